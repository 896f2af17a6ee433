//! 持久化任务存储的抽象
//!
//! 队列存储是任务状态的唯一权威：处理器只通过 `complete`/`fail`/`archive`
//! 报告结果，重试计数与退避都由存储实现负责。

use std::time::Duration;

use async_trait::async_trait;

use super::backoff::Backoff;
use super::envelope::TaskEnvelope;
use super::error::QueueError;

/// 一次出队得到的任务。`receipt` 标识本次租约，用于确认或失败上报。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub envelope: TaskEnvelope,
    pub receipt: String,
}

/// 失败上报后的任务去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// 将在 `delay` 后进行第 `attempt` 次重试
    Retrying { attempt: u32, delay: Duration },
    /// 重试次数已耗尽，进入死信
    Dead,
}

/// 根据当前重试次数决定失败任务的去向
pub fn failure_outcome(envelope: &TaskEnvelope, backoff: &Backoff) -> FailureOutcome {
    if envelope.can_retry() {
        let attempt = envelope.retry_count + 1;
        FailureOutcome::Retrying {
            attempt,
            delay: backoff.delay_at(attempt),
        }
    } else {
        FailureOutcome::Dead
    }
}

#[async_trait]
pub trait TaskBroker: Send + Sync {
    /// 持久化任务，`delay` 为空时立即可被消费
    async fn enqueue(&self, envelope: TaskEnvelope, delay: Option<Duration>)
        -> Result<(), QueueError>;

    /// 按给定队列顺序取出一个任务，最多等待 `wait`。超时返回 `None`。
    ///
    /// 出队的任务处于租约中：既没有确认也没有失败上报的任务会在租约超时后重新投递。
    async fn dequeue(&self, queues: &[String], wait: Duration)
        -> Result<Option<Delivery>, QueueError>;

    /// 确认成功，任务被移除
    async fn complete(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// 上报失败，由存储按退避策略重新调度或移入死信
    async fn fail(&self, delivery: Delivery, error: &str) -> Result<FailureOutcome, QueueError>;

    /// 直接移入死信，用于不可重试的失败
    async fn archive(&self, delivery: Delivery, reason: &str) -> Result<(), QueueError>;
}
