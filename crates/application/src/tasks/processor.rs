//! 任务消费端
//!
//! 每种任务类型注册一个处理器；`start` 启动若干并发消费循环，直到收到关闭信号。
//! 对每个出队任务：解析类型与负载（失败直接进入死信），分发给处理器，
//! 再把结果报告给队列存储。

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::TaskId;
use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::broker::{Delivery, FailureOutcome, TaskBroker};
use super::error::{HandlerError, QueueError};
use super::kind::{TaskKind, TaskPayload};

/// 传给处理器的任务元数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub queue: String,
    pub retry_count: u32,
    pub max_retry: u32,
}

impl TaskContext {
    /// 同一任务的所有重放共享的去重键
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.kind, self.task_id)
    }
}

/// 单一任务类型的处理器。同一任务可能被执行多次，实现必须幂等。
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, ctx: &TaskContext, payload: TaskPayload) -> Result<(), HandlerError>;
}

const RESTART_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// 按优先顺序消费的队列
    pub queues: Vec<String>,
    /// 并发消费循环数量
    pub concurrency: usize,
    /// 单次出队的最长等待时间
    pub poll_timeout: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            queues: vec!["critical".to_owned(), "default".to_owned()],
            concurrency: 4,
            poll_timeout: Duration::from_secs(2),
        }
    }
}

/// 单个任务的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    Retrying { attempt: u32, delay: Duration },
    Dead,
}

pub struct TaskProcessor {
    broker: Arc<dyn TaskBroker>,
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
    config: ProcessorConfig,
}

impl TaskProcessor {
    pub fn new(broker: Arc<dyn TaskBroker>, config: ProcessorConfig) -> Self {
        Self {
            broker,
            handlers: HashMap::new(),
            config,
        }
    }

    /// 注册处理器，同一类型重复注册时后者覆盖前者
    pub fn register(&mut self, kind: TaskKind, handler: Arc<dyn TaskHandler>) -> &mut Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn registered_kinds(&self) -> Vec<TaskKind> {
        let mut kinds: Vec<TaskKind> = self.handlers.keys().copied().collect();
        kinds.sort_by_key(|kind| kind.as_str());
        kinds
    }

    /// 启动消费循环并阻塞，直到 `shutdown` 被取消且在途任务处理完毕
    pub async fn start(self, shutdown: CancellationToken) -> Result<(), QueueError> {
        if self.handlers.is_empty() {
            return Err(QueueError::NoHandlers);
        }

        let workers = self.config.concurrency.max(1);
        info!(
            workers,
            queues = ?self.config.queues,
            kinds = ?self.registered_kinds(),
            "任务处理器启动"
        );

        let processor = Arc::new(self);
        let mut set = JoinSet::new();
        for worker in 0..workers {
            let processor = processor.clone();
            let shutdown = shutdown.clone();
            set.spawn(async move { processor.supervise(worker, shutdown).await });
        }

        while let Some(result) = set.join_next().await {
            if let Err(err) = result {
                error!(error = %err, "任务消费循环监督任务异常退出");
            }
        }

        info!("任务处理器已停止");
        Ok(())
    }

    /// 消费循环异常退出时重新拉起，直到收到关闭信号
    async fn supervise(self: Arc<Self>, worker: usize, shutdown: CancellationToken) {
        loop {
            let processor = self.clone();
            let token = shutdown.clone();
            let result = tokio::spawn(async move { processor.run_worker(worker, token).await }).await;
            match result {
                Ok(()) => break,
                Err(err) if shutdown.is_cancelled() => {
                    error!(worker, error = %err, "任务消费循环在关闭期间异常退出");
                    break;
                }
                Err(err) => {
                    error!(worker, error = %err, "任务消费循环异常退出，重新启动");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RESTART_DELAY) => {}
                    }
                }
            }
        }
    }

    async fn run_worker(&self, worker: usize, shutdown: CancellationToken) {
        debug!(worker, "消费循环启动");
        loop {
            // 只在等待新任务时响应关闭，已出队的任务会处理完
            let dequeued = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.broker.dequeue(&self.config.queues, self.config.poll_timeout) => result,
            };

            match dequeued {
                Ok(Some(delivery)) => {
                    if let Err(err) = self.execute(delivery).await {
                        error!(worker, error = %err, "任务结果上报失败");
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    error!(worker, error = %err, "任务出队失败");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }
        debug!(worker, "消费循环退出");
    }

    /// 出队并处理一个任务，等待超时返回 `None`
    pub async fn process_next(&self) -> Result<Option<TaskOutcome>, QueueError> {
        match self
            .broker
            .dequeue(&self.config.queues, self.config.poll_timeout)
            .await?
        {
            Some(delivery) => self.execute(delivery).await.map(Some),
            None => Ok(None),
        }
    }

    /// 解析、分发一个已出队的任务并上报结果
    pub async fn execute(&self, delivery: Delivery) -> Result<TaskOutcome, QueueError> {
        let envelope = &delivery.envelope;
        let task_id = envelope.id;

        let kind = match envelope.kind.parse::<TaskKind>() {
            Ok(kind) => kind,
            Err(err) => return self.dead_letter(delivery, &err.to_string()).await,
        };
        let payload = match TaskPayload::decode(kind, &envelope.payload) {
            Ok(payload) => payload,
            Err(err) => return self.dead_letter(delivery, &err.to_string()).await,
        };

        let Some(handler) = self.handlers.get(&kind).cloned() else {
            warn!(task_id = %task_id, task_name = %kind, "没有注册处理器，稍后重试");
            let outcome = self
                .broker
                .fail(delivery, "no handler registered")
                .await?;
            return Ok(outcome.into());
        };

        let ctx = TaskContext {
            task_id,
            kind,
            queue: envelope.queue.clone(),
            retry_count: envelope.retry_count,
            max_retry: envelope.max_retry,
        };

        // panic 与普通失败一样交给存储重试，不会带走消费循环
        let result = AssertUnwindSafe(handler.handle(&ctx, payload))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(panic.as_ref()))));

        match result {
            Ok(()) => {
                self.broker.complete(&delivery).await?;
                debug!(task_id = %task_id, task_name = %kind, "任务处理成功");
                Ok(TaskOutcome::Succeeded)
            }
            Err(err) if !err.is_retryable() => self.dead_letter(delivery, &err.to_string()).await,
            Err(err) => {
                warn!(
                    task_id = %task_id,
                    task_name = %kind,
                    retry_count = ctx.retry_count,
                    max_retry = ctx.max_retry,
                    error = %err,
                    "任务处理失败"
                );
                let outcome = self.broker.fail(delivery, &err.to_string()).await?;
                if outcome == FailureOutcome::Dead {
                    error!(task_id = %task_id, task_name = %kind, "任务重试次数耗尽，进入死信");
                }
                Ok(outcome.into())
            }
        }
    }

    async fn dead_letter(&self, delivery: Delivery, reason: &str) -> Result<TaskOutcome, QueueError> {
        error!(
            task_id = %delivery.envelope.id,
            task_name = %delivery.envelope.kind,
            queue = %delivery.envelope.queue,
            reason,
            "任务无法处理，进入死信"
        );
        self.broker.archive(delivery, reason).await?;
        Ok(TaskOutcome::Dead)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

impl From<FailureOutcome> for TaskOutcome {
    fn from(outcome: FailureOutcome) -> Self {
        match outcome {
            FailureOutcome::Retrying { attempt, delay } => TaskOutcome::Retrying { attempt, delay },
            FailureOutcome::Dead => TaskOutcome::Dead,
        }
    }
}
