//! 账户Repository接口定义

use async_trait::async_trait;

use crate::entities::{Account, NewAccount};
use crate::errors::RepositoryError;
use crate::value_objects::UserId;

/// 账户接口
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// 用户名或邮箱已被占用时返回 `RepositoryError::Duplicate`
    async fn create(&self, account: NewAccount) -> Result<Account, RepositoryError>;

    /// 按 ID 读取账户，不存在时返回 `RepositoryError::NotFound`
    async fn find_by_id(&self, id: UserId) -> Result<Account, RepositoryError>;
}
