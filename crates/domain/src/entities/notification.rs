//! 通知实体定义
//!
//! 通知是离线投递的持久化记录，已读确认由外部协作方完成。

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{NotificationId, Timestamp, UserId};

/// 通知状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Unread,
    Read,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Unread => "unread",
            NotificationStatus::Read => "read",
        }
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        match value {
            "unread" => Ok(NotificationStatus::Unread),
            "read" => Ok(NotificationStatus::Read),
            other => Err(DomainError::validation_error(
                "status",
                format!("unknown notification status `{other}`"),
            )),
        }
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 已持久化的通知记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: NotificationId,
    pub source_id: UserId,
    pub dest_id: UserId,
    pub content: String,
    pub status: NotificationStatus,
    pub created_at: Timestamp,
}

impl NotificationRecord {
    /// 该通知是否属于指定用户
    pub fn is_for(&self, user_id: UserId) -> bool {
        self.dest_id == user_id
    }
}

/// 待持久化的通知，新建的通知总是未读状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub source_id: UserId,
    pub dest_id: UserId,
    pub content: String,
}

impl NewNotification {
    pub fn new(source_id: UserId, dest_id: UserId, content: impl Into<String>) -> Self {
        Self {
            source_id,
            dest_id,
            content: content.into(),
        }
    }

    pub fn into_record(self, id: NotificationId, created_at: Timestamp) -> NotificationRecord {
        NotificationRecord {
            id,
            source_id: self.source_id,
            dest_id: self.dest_id,
            content: self.content,
            status: NotificationStatus::Unread,
            created_at,
        }
    }
}
