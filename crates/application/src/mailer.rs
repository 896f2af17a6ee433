use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MailError {
    #[error("mail transport error: {0}")]
    Transport(String),

    #[error("mail rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
}

/// 邮件发送协作方
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError>;
}
