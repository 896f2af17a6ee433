use std::sync::Arc;

use async_trait::async_trait;
use domain::{NewNotification, NotificationRecord};
use tracing::{debug, info};

use super::DeliveryOrchestrator;
use crate::tasks::{HandlerError, TaskContext, TaskKind, TaskPayload, TaskHandler};
use crate::transport::{Audience, PushEvent};

impl DeliveryOrchestrator {
    /// 保存未读通知并推送给目标用户。
    ///
    /// 写入以任务的去重键为准，同一任务重放时得到同一条记录。
    pub async fn deliver_notification(
        &self,
        ctx: &TaskContext,
        notification: NewNotification,
    ) -> Result<NotificationRecord, HandlerError> {
        let record = self
            .notifications
            .create_once(&ctx.dedup_key(), notification)
            .await?;
        info!(
            task_id = %ctx.task_id,
            notification_id = %record.id,
            dest_id = %record.dest_id,
            "通知已保存"
        );

        let event = PushEvent::Notification(record.clone());
        for transport in &self.transports {
            let delivered = transport.push(Audience::User(record.dest_id), &event);
            debug!(transport = transport.name(), delivered, notification_id = %record.id, "通知已推送");
        }

        Ok(record)
    }
}

pub struct SendNotificationHandler {
    orchestrator: Arc<DeliveryOrchestrator>,
}

impl SendNotificationHandler {
    pub fn new(orchestrator: Arc<DeliveryOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl TaskHandler for SendNotificationHandler {
    async fn handle(&self, ctx: &TaskContext, payload: TaskPayload) -> Result<(), HandlerError> {
        let payload = match payload {
            TaskPayload::SendNotification(payload) => payload,
            other => {
                return Err(HandlerError::UnexpectedPayload {
                    expected: TaskKind::SendNotification,
                    actual: other.kind(),
                })
            }
        };

        let notification = NewNotification::new(payload.source_id, payload.dest_id, payload.content);
        self.orchestrator
            .deliver_notification(ctx, notification)
            .await
            .map(|_| ())
    }
}
