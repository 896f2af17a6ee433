use std::sync::Arc;

use domain::{
    AccountRepository, ChatMessage, DomainError, MessageRepository, NewMessage, UserId,
};
use tracing::{error, info};

use crate::error::ApplicationError;
use crate::tasks::{EnqueueOptions, TaskDistributor};

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub sender_id: UserId,
    /// 为空时是公共广播
    pub receiver_id: Option<UserId>,
    pub content: String,
}

pub struct MessageServiceDependencies {
    pub accounts: Arc<dyn AccountRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub distributor: TaskDistributor,
}

/// 消息发送用例：校验、落库、把投递交给后台任务
pub struct MessageService {
    deps: MessageServiceDependencies,
}

impl MessageService {
    pub fn new(deps: MessageServiceDependencies) -> Self {
        Self { deps }
    }

    /// `requester` 是已认证的调用者，只能以自己的身份发送。
    ///
    /// 消息写入成功后才入队投递任务；入队失败只记录日志，不影响返回结果。
    pub async fn send(
        &self,
        requester: UserId,
        request: SendMessageRequest,
    ) -> Result<ChatMessage, ApplicationError> {
        if requester != request.sender_id {
            return Err(ApplicationError::Authorization);
        }

        if let Some(receiver_id) = request.receiver_id {
            self.deps
                .accounts
                .find_by_id(receiver_id)
                .await
                .map_err(|err| match err {
                    domain::RepositoryError::NotFound => ApplicationError::Domain(
                        DomainError::validation_error("receiver_id", "receiver does not exist"),
                    ),
                    other => ApplicationError::Repository(other),
                })?;
        }

        let new_message = NewMessage::new(request.sender_id, request.receiver_id, request.content)?;
        let message = self.deps.messages.create(new_message).await?;
        info!(
            message_id = %message.id,
            sender_id = %message.sender_id,
            chat_type = message.chat_type.as_str(),
            "消息已保存"
        );

        if let Err(err) = self
            .deps
            .distributor
            .distribute_send_message(&message, EnqueueOptions::default())
            .await
        {
            error!(
                message_id = %message.id,
                error = %err,
                "消息已保存，但投递任务入队失败"
            );
        }

        Ok(message)
    }
}
