use domain::RepositoryError;
use thiserror::Error;

use super::kind::TaskKind;
use crate::mailer::MailError;

/// 任务队列基础设施错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("payload serialization failed: {0}")]
    Serialization(String),

    #[error("payload decode failed for {kind}: {message}")]
    Decode { kind: String, message: String },

    #[error("task broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("unknown task type: {0}")]
    UnknownTask(String),

    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    #[error("no task handlers registered")]
    NoHandlers,
}

impl QueueError {
    pub fn broker(message: impl Into<String>) -> Self {
        Self::BrokerUnavailable(message.into())
    }
}

/// 任务处理器返回的失败
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("unexpected payload: expected {expected}, got {actual}")]
    UnexpectedPayload { expected: TaskKind, actual: TaskKind },

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("mail error: {0}")]
    Mail(#[from] MailError),

    #[error("event encoding failed: {0}")]
    Encode(String),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

impl HandlerError {
    /// 负载类型不匹配或事件无法编码，重放多少次都不会成功，直接进入死信
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            HandlerError::UnexpectedPayload { .. } | HandlerError::Encode(_)
        )
    }
}
