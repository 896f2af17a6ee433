//! 消息实体定义
//!
//! 没有接收者的消息是公共广播，有接收者的是私聊。

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{MessageId, Timestamp, UserId};

/// 单条消息内容的最大长度（字符数）
pub const MAX_CONTENT_LENGTH: usize = 4000;

/// 会话类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatType {
    /// 公共广播
    #[serde(rename = "public-chat")]
    Public,
    /// 私聊
    #[serde(rename = "private-chat")]
    Private,
}

impl ChatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatType::Public => "public-chat",
            ChatType::Private => "private-chat",
        }
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        match value {
            "public-chat" => Ok(ChatType::Public),
            "private-chat" => Ok(ChatType::Private),
            other => Err(DomainError::validation_error(
                "chat_type",
                format!("unknown chat type `{other}`"),
            )),
        }
    }
}

/// 已持久化的消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: Option<UserId>,
    pub chat_type: ChatType,
    pub content: String,
    pub created_at: Timestamp,
}

impl ChatMessage {
    /// 是否为公共广播消息
    pub fn is_broadcast(&self) -> bool {
        self.receiver_id.is_none()
    }
}

/// 待持久化的消息，构造时完成校验
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub receiver_id: Option<UserId>,
    pub content: String,
}

impl NewMessage {
    pub fn new(
        sender_id: UserId,
        receiver_id: Option<UserId>,
        content: impl Into<String>,
    ) -> DomainResult<Self> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(DomainError::validation_error("content", "cannot be empty"));
        }
        if content.chars().count() > MAX_CONTENT_LENGTH {
            return Err(DomainError::validation_error("content", "too long"));
        }
        if receiver_id == Some(sender_id) {
            return Err(DomainError::validation_error(
                "receiver_id",
                "cannot send a private message to yourself",
            ));
        }

        Ok(Self {
            sender_id,
            receiver_id,
            content,
        })
    }

    pub fn chat_type(&self) -> ChatType {
        match self.receiver_id {
            Some(_) => ChatType::Private,
            None => ChatType::Public,
        }
    }

    /// 由存储层分配 ID 与时间戳后生成持久化实体
    pub fn into_message(self, id: MessageId, created_at: Timestamp) -> ChatMessage {
        let chat_type = self.chat_type();
        ChatMessage {
            id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            chat_type,
            content: self.content,
            created_at,
        }
    }
}
