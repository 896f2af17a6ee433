//! 推送能力的统一抽象。
//!
//! WebSocket 在线表（[`crate::PresenceHub`]）和 SSE 订阅集（[`crate::NotificationFeed`]）
//! 服务两种不同的传输，投递方通过同一个 [`PushTransport`] 接口同时考虑两者。

use domain::{ChatMessage, NotificationRecord, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 推送给客户端的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PushEvent {
    Message(ChatMessage),
    Notification(NotificationRecord),
}

impl PushEvent {
    pub fn to_json(&self) -> Result<String, PushError> {
        serde_json::to_string(self).map_err(|err| PushError::Encode(err.to_string()))
    }

    pub fn as_notification(&self) -> Option<&NotificationRecord> {
        match self {
            PushEvent::Notification(record) => Some(record),
            PushEvent::Message(_) => None,
        }
    }
}

/// 推送目标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    User(UserId),
    Everyone,
}

/// 单次推送失败的原因。推送是尽力而为的，这些错误只记录日志，不重试。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PushError {
    #[error("outbound buffer is full")]
    Saturated,
    #[error("outbound transport is closed")]
    Closed,
    #[error("event encoding failed: {0}")]
    Encode(String),
}

/// 一种可以把事件推送给在线用户的传输
pub trait PushTransport: Send + Sync {
    /// 传输名称，用于日志
    fn name(&self) -> &'static str;

    /// 推送事件，返回成功投递的接收方数量。不会阻塞调用方。
    fn push(&self, audience: Audience, event: &PushEvent) -> usize;
}
