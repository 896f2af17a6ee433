//! 消息Repository接口定义

use async_trait::async_trait;

use crate::entities::{ChatMessage, NewMessage};
use crate::errors::RepositoryError;

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 持久化消息并返回带 ID 的实体
    async fn create(&self, message: NewMessage) -> Result<ChatMessage, RepositoryError>;
}
