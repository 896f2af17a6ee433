use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::password::PasswordHasherError;
use crate::tasks::QueueError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("task queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("password error: {0}")]
    Password(#[from] PasswordHasherError),
    #[error("authorization failed")]
    Authorization,
}

pub type ApplicationResult<T> = Result<T, ApplicationError>;
