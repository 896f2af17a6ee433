//! 任务类型与负载
//!
//! 每种任务类型对应一个负载变体和一个处理器，新增任务只需要增加一个变体并注册处理器。

use std::fmt;
use std::str::FromStr;

use domain::{ChatMessage, UserId};
use serde::{Deserialize, Serialize};

use super::error::QueueError;

/// 任务类型标识，即任务在队列中的名称
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    SendMessage,
    SendNotification,
    SendEmail,
}

impl TaskKind {
    pub const ALL: [TaskKind; 3] = [
        TaskKind::SendMessage,
        TaskKind::SendNotification,
        TaskKind::SendEmail,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::SendMessage => "send-message",
            TaskKind::SendNotification => "send-notification",
            TaskKind::SendEmail => "send-email",
        }
    }

    /// 未指定队列时使用的队列。实时消息走 `critical`，其余走 `default`。
    pub fn default_queue(&self) -> &'static str {
        match self {
            TaskKind::SendMessage => "critical",
            TaskKind::SendNotification | TaskKind::SendEmail => "default",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = QueueError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| QueueError::UnknownTask(value.to_owned()))
    }
}

/// send-notification 负载
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub source_id: UserId,
    pub dest_id: UserId,
    pub content: String,
}

/// send-email 负载
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailPayload {
    pub email: String,
    pub username: String,
}

/// 带类型的任务负载
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskPayload {
    SendMessage(ChatMessage),
    SendNotification(NotificationPayload),
    SendEmail(EmailPayload),
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::SendMessage(_) => TaskKind::SendMessage,
            TaskPayload::SendNotification(_) => TaskKind::SendNotification,
            TaskPayload::SendEmail(_) => TaskKind::SendEmail,
        }
    }

    /// 序列化为队列中保存的字节
    pub fn encode(&self) -> Result<Vec<u8>, QueueError> {
        let encoded = match self {
            TaskPayload::SendMessage(message) => serde_json::to_vec(message),
            TaskPayload::SendNotification(payload) => serde_json::to_vec(payload),
            TaskPayload::SendEmail(payload) => serde_json::to_vec(payload),
        };
        encoded.map_err(|err| QueueError::Serialization(err.to_string()))
    }

    /// 按任务类型解析字节。解析失败不可重试，因为字节不会改变。
    pub fn decode(kind: TaskKind, bytes: &[u8]) -> Result<Self, QueueError> {
        let decoded = match kind {
            TaskKind::SendMessage => serde_json::from_slice(bytes).map(TaskPayload::SendMessage),
            TaskKind::SendNotification => {
                serde_json::from_slice(bytes).map(TaskPayload::SendNotification)
            }
            TaskKind::SendEmail => serde_json::from_slice(bytes).map(TaskPayload::SendEmail),
        };
        decoded.map_err(|err| QueueError::Decode {
            kind: kind.as_str().to_owned(),
            message: err.to_string(),
        })
    }
}

impl From<ChatMessage> for TaskPayload {
    fn from(message: ChatMessage) -> Self {
        TaskPayload::SendMessage(message)
    }
}

impl From<NotificationPayload> for TaskPayload {
    fn from(payload: NotificationPayload) -> Self {
        TaskPayload::SendNotification(payload)
    }
}

impl From<EmailPayload> for TaskPayload {
    fn from(payload: EmailPayload) -> Self {
        TaskPayload::SendEmail(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_match_queue_wire_names() {
        assert_eq!("send-message".parse::<TaskKind>().unwrap(), TaskKind::SendMessage);
        assert_eq!(
            serde_json::to_string(&TaskKind::SendNotification).unwrap(),
            "\"send-notification\""
        );
        assert!(matches!(
            "resize-image".parse::<TaskKind>(),
            Err(QueueError::UnknownTask(name)) if name == "resize-image"
        ));
    }

    #[test]
    fn notification_payload_uses_snake_case_fields() {
        let payload = TaskPayload::SendNotification(NotificationPayload {
            source_id: UserId::new(1),
            dest_id: UserId::new(2),
            content: "hi".into(),
        });
        let bytes = payload.encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["source_id"], 1);
        assert_eq!(value["dest_id"], 2);

        assert_eq!(
            TaskPayload::decode(TaskKind::SendNotification, &bytes).unwrap(),
            payload
        );
    }

    #[test]
    fn malformed_bytes_fail_to_decode() {
        let err = TaskPayload::decode(TaskKind::SendEmail, b"{not json").unwrap_err();
        assert!(matches!(err, QueueError::Decode { ref kind, .. } if kind == "send-email"));

        // 字段缺失同样是解码失败
        let err = TaskPayload::decode(TaskKind::SendEmail, br#"{"email":"a@b.c"}"#).unwrap_err();
        assert!(matches!(err, QueueError::Decode { .. }));
    }

    #[test]
    fn default_queues() {
        assert_eq!(TaskKind::SendMessage.default_queue(), "critical");
        assert_eq!(TaskKind::SendEmail.default_queue(), "default");
    }
}
