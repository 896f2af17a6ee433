use std::sync::Arc;

use domain::{Account, AccountRepository};
use serde::Serialize;
use tracing::warn;

use crate::presence::PresenceHub;

/// 在线用户报告
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnlineReport {
    pub total: usize,
    pub users: Vec<Account>,
}

pub struct OnlineUsersService {
    hub: Arc<PresenceHub>,
    accounts: Arc<dyn AccountRepository>,
}

impl OnlineUsersService {
    pub fn new(hub: Arc<PresenceHub>, accounts: Arc<dyn AccountRepository>) -> Self {
        Self { hub, accounts }
    }

    /// 当前在线用户。账户读取失败的用户被跳过，`total` 仍按连接数统计。
    pub async fn report(&self) -> OnlineReport {
        let online = self.hub.online_users();
        let mut users = Vec::with_capacity(online.len());
        for user_id in &online {
            match self.accounts.find_by_id(*user_id).await {
                Ok(account) => users.push(account),
                Err(err) => warn!(user_id = %user_id, error = %err, "在线用户的账户读取失败"),
            }
        }

        OnlineReport {
            total: online.len(),
            users,
        }
    }
}
