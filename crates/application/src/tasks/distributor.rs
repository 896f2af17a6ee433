use std::sync::Arc;

use domain::ChatMessage;
use tracing::{error, info};

use super::broker::TaskBroker;
use super::envelope::{EnqueueOptions, QueueSettings, TaskEnvelope, TaskInfo};
use super::error::QueueError;
use super::kind::{EmailPayload, NotificationPayload, TaskPayload};

/// 任务生产端：请求处理路径通过它把副作用交给后台处理
#[derive(Clone)]
pub struct TaskDistributor {
    broker: Arc<dyn TaskBroker>,
    queues: Vec<QueueSettings>,
}

impl TaskDistributor {
    pub fn new(broker: Arc<dyn TaskBroker>, queues: Vec<QueueSettings>) -> Self {
        Self { broker, queues }
    }

    pub fn queues(&self) -> &[QueueSettings] {
        &self.queues
    }

    /// 序列化负载并入队
    pub async fn enqueue(
        &self,
        payload: &TaskPayload,
        options: EnqueueOptions,
    ) -> Result<TaskInfo, QueueError> {
        let kind = payload.kind();
        let queue = options
            .queue
            .unwrap_or_else(|| kind.default_queue().to_owned());
        let settings = self
            .queues
            .iter()
            .find(|settings| settings.name == queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.clone()))?;
        let max_retry = options.max_retry.unwrap_or(settings.max_retry);

        let bytes = payload.encode()?;
        let envelope = TaskEnvelope::new(kind, bytes, queue.clone(), max_retry);
        let task_id = envelope.id;

        self.broker
            .enqueue(envelope, options.delay)
            .await
            .inspect_err(|err| {
                error!(task_name = %kind, queue = %queue, error = %err, "任务入队失败");
            })?;

        info!(
            task_id = %task_id,
            task_name = %kind,
            queue = %queue,
            max_retry,
            "任务已入队"
        );

        Ok(TaskInfo {
            id: task_id,
            kind,
            queue,
            max_retry,
        })
    }

    pub async fn distribute_send_message(
        &self,
        message: &ChatMessage,
        options: EnqueueOptions,
    ) -> Result<TaskInfo, QueueError> {
        self.enqueue(&TaskPayload::SendMessage(message.clone()), options)
            .await
    }

    pub async fn distribute_send_notification(
        &self,
        payload: NotificationPayload,
        options: EnqueueOptions,
    ) -> Result<TaskInfo, QueueError> {
        self.enqueue(&TaskPayload::SendNotification(payload), options)
            .await
    }

    pub async fn distribute_send_email(
        &self,
        payload: EmailPayload,
        options: EnqueueOptions,
    ) -> Result<TaskInfo, QueueError> {
        self.enqueue(&TaskPayload::SendEmail(payload), options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTaskBroker;
    use crate::tasks::TaskKind;
    use domain::UserId;
    use std::time::Duration;

    fn distributor(broker: Arc<MemoryTaskBroker>) -> TaskDistributor {
        TaskDistributor::new(broker, QueueSettings::defaults())
    }

    fn notification() -> NotificationPayload {
        NotificationPayload {
            source_id: UserId::new(1),
            dest_id: UserId::new(2),
            content: "hi".into(),
        }
    }

    #[tokio::test]
    async fn uses_kind_default_queue_and_queue_max_retry() {
        let broker = Arc::new(MemoryTaskBroker::default());
        let info = distributor(broker.clone())
            .distribute_send_notification(notification(), EnqueueOptions::default())
            .await
            .unwrap();

        assert_eq!(info.kind, TaskKind::SendNotification);
        assert_eq!(info.queue, "default");
        assert_eq!(info.max_retry, 5);
        assert_eq!(broker.pending_count("default"), 1);
    }

    #[tokio::test]
    async fn options_override_defaults() {
        let broker = Arc::new(MemoryTaskBroker::default());
        let info = distributor(broker.clone())
            .distribute_send_email(
                EmailPayload {
                    email: "a@example.com".into(),
                    username: "alice".into(),
                },
                EnqueueOptions::default()
                    .queue("critical")
                    .max_retry(1)
                    .delay(Duration::from_secs(30)),
            )
            .await
            .unwrap();

        assert_eq!(info.queue, "critical");
        assert_eq!(info.max_retry, 1);
        assert_eq!(broker.scheduled_count(), 1);
        assert_eq!(broker.pending_count("critical"), 0);
    }

    #[tokio::test]
    async fn unknown_queue_is_rejected_before_enqueue() {
        let broker = Arc::new(MemoryTaskBroker::default());
        let err = distributor(broker.clone())
            .distribute_send_notification(notification(), EnqueueOptions::default().queue("bulk"))
            .await
            .unwrap_err();

        assert_eq!(err, QueueError::UnknownQueue("bulk".into()));
        assert_eq!(broker.pending_count("bulk"), 0);
    }

    #[tokio::test]
    async fn broker_outage_surfaces_to_caller() {
        let broker = Arc::new(MemoryTaskBroker::default());
        broker.set_unavailable(true);

        let err = distributor(broker)
            .distribute_send_notification(notification(), EnqueueOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::BrokerUnavailable(_)));
    }
}
