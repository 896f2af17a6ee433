//! 持久化、至少一次的后台任务队列
//!
//! 生产端 [`TaskDistributor`] 把带类型的负载序列化后交给 [`TaskBroker`]；
//! 消费端 [`TaskProcessor`] 出队、按类型分发给注册的 [`TaskHandler`]，
//! 并把成功或失败报告给存储，由存储负责重试和死信。

pub mod backoff;
pub mod broker;
pub mod distributor;
pub mod envelope;
pub mod error;
pub mod kind;
pub mod processor;

pub use backoff::Backoff;
pub use broker::{failure_outcome, Delivery, FailureOutcome, TaskBroker};
pub use distributor::TaskDistributor;
pub use envelope::{DeadTask, EnqueueOptions, QueueSettings, TaskEnvelope, TaskInfo};
pub use error::{HandlerError, QueueError};
pub use kind::{EmailPayload, NotificationPayload, TaskKind, TaskPayload};
pub use processor::{ProcessorConfig, TaskContext, TaskHandler, TaskOutcome, TaskProcessor};
