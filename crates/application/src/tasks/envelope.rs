use std::time::Duration;

use domain::{TaskId, Timestamp};
use serde::{Deserialize, Serialize};

use super::kind::TaskKind;

/// 队列中保存的任务单元。负载对队列不透明，只有处理器按 `kind` 解析。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub id: TaskId,
    /// 任务类型的名称，保留原始字符串以便识别未知类型
    pub kind: String,
    pub payload: Vec<u8>,
    pub queue: String,
    pub retry_count: u32,
    pub max_retry: u32,
    pub enqueued_at: Timestamp,
    pub last_error: Option<String>,
}

impl TaskEnvelope {
    pub fn new(kind: TaskKind, payload: Vec<u8>, queue: impl Into<String>, max_retry: u32) -> Self {
        Self {
            id: TaskId::new(),
            kind: kind.as_str().to_owned(),
            payload,
            queue: queue.into(),
            retry_count: 0,
            max_retry,
            enqueued_at: chrono::Utc::now(),
            last_error: None,
        }
    }

    /// 还能否再重试一次
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retry
    }
}

/// 入队选项，未设置的字段使用任务类型和队列的默认值
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    pub queue: Option<String>,
    pub max_retry: Option<u32>,
    pub delay: Option<Duration>,
}

impl EnqueueOptions {
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = Some(max_retry);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// 入队结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub kind: TaskKind,
    pub queue: String,
    pub max_retry: u32,
}

/// 单个队列的配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    pub name: String,
    pub max_retry: u32,
}

impl QueueSettings {
    pub fn new(name: impl Into<String>, max_retry: u32) -> Self {
        Self {
            name: name.into(),
            max_retry,
        }
    }

    /// `critical` 与 `default` 两个队列
    pub fn defaults() -> Vec<QueueSettings> {
        vec![
            QueueSettings::new("critical", 10),
            QueueSettings::new("default", 5),
        ]
    }
}

/// 死信队列中的任务，等待人工处理
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadTask {
    pub envelope: TaskEnvelope,
    pub reason: String,
    pub archived_at: Timestamp,
}
