use std::sync::Arc;

use async_trait::async_trait;
use domain::{ChatMessage, NewNotification, NotificationRecord, UserId};
use tracing::{info, warn};

use super::DeliveryOrchestrator;
use crate::presence::PushMiss;
use crate::tasks::{HandlerError, TaskContext, TaskHandler, TaskKind, TaskPayload};
use crate::transport::{PushError, PushEvent};

/// 一条消息的投递结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// 公共消息：成功推送数 / 当时在线数
    Broadcast { delivered: usize, online: usize },
    /// 私聊消息已推给在线的接收者
    Delivered,
    /// 接收者在线但缓冲区已满，消息被丢弃，客户端可从历史记录补齐
    Dropped,
    /// 接收者离线，已转为通知
    Deferred(NotificationRecord),
}

impl DeliveryOrchestrator {
    /// 投递一条已持久化的消息
    pub async fn deliver_message(
        &self,
        ctx: &TaskContext,
        message: ChatMessage,
    ) -> Result<MessageOutcome, HandlerError> {
        let event = PushEvent::Message(message.clone());

        let Some(receiver_id) = message.receiver_id else {
            let online = self.hub.count();
            let delivered = self.hub.broadcast(&event);
            info!(message_id = %message.id, delivered, online, "公共消息已广播");
            return Ok(MessageOutcome::Broadcast { delivered, online });
        };

        match self.hub.try_send_to(receiver_id, &event) {
            Ok(()) => {
                info!(message_id = %message.id, receiver_id = %receiver_id, "私聊消息已推送");
                Ok(MessageOutcome::Delivered)
            }
            Err(PushMiss::Transport(PushError::Saturated)) => {
                warn!(message_id = %message.id, receiver_id = %receiver_id, "接收者缓冲区已满，消息未推送");
                Ok(MessageOutcome::Dropped)
            }
            Err(PushMiss::Transport(PushError::Encode(err))) => Err(HandlerError::Encode(err)),
            Err(PushMiss::Offline) | Err(PushMiss::Transport(PushError::Closed)) => {
                info!(message_id = %message.id, receiver_id = %receiver_id, "接收者离线，转为通知");
                let content = self.offline_notice(message.sender_id).await?;
                let notification = NewNotification::new(message.sender_id, receiver_id, content);
                let record = self.deliver_notification(ctx, notification).await?;
                Ok(MessageOutcome::Deferred(record))
            }
        }
    }

    /// 离线通知的文案。发送者账户不存在时使用通用文案，其它存储错误交给重试。
    async fn offline_notice(&self, sender_id: UserId) -> Result<String, HandlerError> {
        match self.accounts.find_by_id(sender_id).await {
            Ok(account) => Ok(format!("{} sent you a message", account.username)),
            Err(err) if err.is_not_found() => Ok("You have a new message".to_owned()),
            Err(err) => Err(err.into()),
        }
    }
}

pub struct SendMessageHandler {
    orchestrator: Arc<DeliveryOrchestrator>,
}

impl SendMessageHandler {
    pub fn new(orchestrator: Arc<DeliveryOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl TaskHandler for SendMessageHandler {
    async fn handle(&self, ctx: &TaskContext, payload: TaskPayload) -> Result<(), HandlerError> {
        let message = match payload {
            TaskPayload::SendMessage(message) => message,
            other => {
                return Err(HandlerError::UnexpectedPayload {
                    expected: TaskKind::SendMessage,
                    actual: other.kind(),
                })
            }
        };

        self.orchestrator
            .deliver_message(ctx, message)
            .await
            .map(|_| ())
    }
}
