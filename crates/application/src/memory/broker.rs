use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::tasks::{
    failure_outcome, Backoff, DeadTask, Delivery, FailureOutcome, QueueError, TaskBroker,
    TaskEnvelope,
};

const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(30);
const LEASE_EXPIRED: &str = "lease expired";

struct Lease {
    envelope: TaskEnvelope,
    expires_at: Instant,
}

#[derive(Default)]
struct State {
    ready: HashMap<String, VecDeque<TaskEnvelope>>,
    scheduled: Vec<(Instant, TaskEnvelope)>,
    leased: HashMap<String, Lease>,
    dead: Vec<DeadTask>,
    completed: usize,
    next_receipt: u64,
    unavailable: bool,
}

impl State {
    /// 把到期的延迟任务和租约超时的任务放回就绪队列
    fn promote(&mut self, now: Instant) {
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.scheduled)
            .into_iter()
            .partition(|(at, _)| *at <= now);
        self.scheduled = pending;
        for (_, envelope) in due {
            self.push_ready(envelope);
        }

        let expired: Vec<String> = self
            .leased
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        for receipt in expired {
            if let Some(lease) = self.leased.remove(&receipt) {
                self.expire(lease.envelope);
            }
        }
    }

    /// 租约超时算作一次失败的执行，超过重试上限的任务进入死信
    fn expire(&mut self, mut envelope: TaskEnvelope) {
        envelope.last_error = Some(LEASE_EXPIRED.to_owned());
        if envelope.can_retry() {
            envelope.retry_count += 1;
            warn!(task_id = %envelope.id, retry_count = envelope.retry_count, "任务租约超时，重新投递");
            self.push_ready(envelope);
        } else {
            error!(task_id = %envelope.id, retry_count = envelope.retry_count, "任务租约超时且重试次数耗尽，进入死信");
            self.dead.push(DeadTask {
                envelope,
                reason: LEASE_EXPIRED.to_owned(),
                archived_at: chrono::Utc::now(),
            });
        }
    }

    fn push_ready(&mut self, envelope: TaskEnvelope) {
        self.ready
            .entry(envelope.queue.clone())
            .or_default()
            .push_back(envelope);
    }

    fn take(&mut self, queues: &[String], now: Instant, lease_timeout: Duration) -> Option<Delivery> {
        let envelope = queues
            .iter()
            .find_map(|queue| self.ready.get_mut(queue).and_then(VecDeque::pop_front))?;

        self.next_receipt += 1;
        let receipt = format!("{}:{}", envelope.id, self.next_receipt);
        self.leased.insert(
            receipt.clone(),
            Lease {
                envelope: envelope.clone(),
                expires_at: now + lease_timeout,
            },
        );
        Some(Delivery { envelope, receipt })
    }

    fn next_wakeup(&self) -> Option<Instant> {
        let scheduled = self.scheduled.iter().map(|(at, _)| *at);
        let leases = self.leased.values().map(|lease| lease.expires_at);
        scheduled.chain(leases).min()
    }
}

/// 进程内的任务存储
///
/// 语义与 Redis 实现一致：延迟调度、租约超时重投、退避重试和死信。
/// 只要实例本身存活，任务就能跨越处理器的重启。
pub struct MemoryTaskBroker {
    state: Mutex<State>,
    notify: Notify,
    backoff: Backoff,
    lease_timeout: Duration,
}

impl MemoryTaskBroker {
    pub fn new(backoff: Backoff, lease_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            backoff,
            lease_timeout,
        }
    }

    /// 模拟存储不可达，之后的所有操作都返回 `BrokerUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    pub fn pending_count(&self, queue: &str) -> usize {
        self.lock().ready.get(queue).map_or(0, VecDeque::len)
    }

    pub fn scheduled_count(&self) -> usize {
        self.lock().scheduled.len()
    }

    pub fn leased_count(&self) -> usize {
        self.lock().leased.len()
    }

    pub fn completed_count(&self) -> usize {
        self.lock().completed
    }

    pub fn dead_tasks(&self) -> Vec<DeadTask> {
        self.lock().dead.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn available(&self) -> Result<std::sync::MutexGuard<'_, State>, QueueError> {
        let state = self.lock();
        if state.unavailable {
            return Err(QueueError::broker("memory broker is unavailable"));
        }
        Ok(state)
    }
}

impl Default for MemoryTaskBroker {
    fn default() -> Self {
        Self::new(Backoff::default(), DEFAULT_LEASE_TIMEOUT)
    }
}

#[async_trait]
impl TaskBroker for MemoryTaskBroker {
    async fn enqueue(
        &self,
        envelope: TaskEnvelope,
        delay: Option<Duration>,
    ) -> Result<(), QueueError> {
        {
            let mut state = self.available()?;
            match delay {
                Some(delay) if !delay.is_zero() => {
                    state.scheduled.push((Instant::now() + delay, envelope));
                }
                _ => state.push_ready(envelope),
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn dequeue(
        &self,
        queues: &[String],
        wait: Duration,
    ) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // 先登记等待，再检查状态，避免丢失唤醒
            notified.as_mut().enable();

            let wake_at = {
                let mut state = self.available()?;
                let now = Instant::now();
                state.promote(now);
                if let Some(delivery) = state.take(queues, now, self.lease_timeout) {
                    return Ok(Some(delivery));
                }
                if now >= deadline {
                    return Ok(None);
                }
                state
                    .next_wakeup()
                    .map_or(deadline, |at| at.min(deadline))
            };

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn complete(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut state = self.available()?;
        if state.leased.remove(&delivery.receipt).is_some() {
            state.completed += 1;
        } else {
            debug!(task_id = %delivery.envelope.id, "租约已失效，任务会被重新投递");
        }
        Ok(())
    }

    async fn fail(&self, delivery: Delivery, error: &str) -> Result<FailureOutcome, QueueError> {
        let outcome = failure_outcome(&delivery.envelope, &self.backoff);
        let mut state = self.available()?;
        if state.leased.remove(&delivery.receipt).is_none() {
            debug!(task_id = %delivery.envelope.id, "租约已失效，忽略失败上报");
            return Ok(outcome);
        }

        let mut envelope = delivery.envelope;
        envelope.last_error = Some(error.to_owned());
        match outcome {
            FailureOutcome::Retrying { attempt, delay } => {
                envelope.retry_count = attempt;
                state.scheduled.push((Instant::now() + delay, envelope));
            }
            FailureOutcome::Dead => state.dead.push(DeadTask {
                envelope,
                reason: error.to_owned(),
                archived_at: chrono::Utc::now(),
            }),
        }
        Ok(outcome)
    }

    async fn archive(&self, delivery: Delivery, reason: &str) -> Result<(), QueueError> {
        let mut state = self.available()?;
        state.leased.remove(&delivery.receipt);
        let mut envelope = delivery.envelope;
        envelope.last_error = Some(reason.to_owned());
        state.dead.push(DeadTask {
            envelope,
            reason: reason.to_owned(),
            archived_at: chrono::Utc::now(),
        });
        Ok(())
    }
}
