//! 账户实体定义
//!
//! 注册时写入账户与密码哈希，投递流程只读取不含凭证的视图。

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::UserId;

/// 用户名最大长度
pub const MAX_USERNAME_LENGTH: usize = 50;

/// 账户只读视图
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: UserId,
    pub username: String,
    pub email: String,
}

impl Account {
    pub fn new(id: UserId, username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            email: email.into(),
        }
    }
}

/// 待创建的账户，密码已经过哈希
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

impl NewAccount {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> DomainResult<Self> {
        let username = username.into().trim().to_owned();
        let email = email.into().trim().to_owned();

        if username.is_empty() {
            return Err(DomainError::validation_error("username", "cannot be empty"));
        }
        if username.chars().count() > MAX_USERNAME_LENGTH {
            return Err(DomainError::validation_error("username", "too long"));
        }
        match email.split_once('@') {
            Some((local, host)) if !local.is_empty() && !host.is_empty() => {}
            _ => return Err(DomainError::validation_error("email", "invalid address")),
        }

        Ok(Self {
            username,
            email,
            password_hash: password_hash.into(),
        })
    }

    pub fn into_account(self, id: UserId) -> Account {
        Account::new(id, self.username, self.email)
    }
}
