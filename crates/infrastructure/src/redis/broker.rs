//! 基于 Redis Streams 消费者组的任务存储
//!
//! 键布局（`{prefix}` 为配置的前缀）：
//! - `{prefix}:queue:{name}`：每个队列一个 Stream，所有进程共用一个消费者组
//! - `{prefix}:scheduled`：延迟和退避中的任务，ZSET，分数为到期时间（毫秒）
//! - `{prefix}:task:{id}`：延迟任务的字段，HASH
//! - `{prefix}:dead`：死信 Stream
//!
//! 出队的条目留在消费者组的 PEL 中直到确认；空闲超过租约时间的条目会被
//! `XAUTOCLAIM` 重新领取，因此进程崩溃不会丢任务。每次重新领取都算作一次失败的执行，
//! 超过重试上限的条目直接进入死信。

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use application::tasks::{
    failure_outcome, Backoff, DeadTask, Delivery, FailureOutcome, QueueError, TaskBroker,
    TaskEnvelope,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{StreamRangeReply, StreamReadReply};
use redis::{Cmd, Script, Value};
use tracing::{debug, error, info, warn};

use super::codec::{decode_fields, encode_fields, parse_autoclaim, parse_delivery_count, CodecError};

/// 把到期的延迟任务搬回各自的队列 Stream
const PROMOTE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[4]))
local moved = 0
for _, id in ipairs(due) do
  if redis.call('ZREM', KEYS[1], id) == 1 then
    local key = ARGV[2] .. id
    local fields = redis.call('HGETALL', key)
    if #fields > 0 then
      local queue = nil
      for i = 1, #fields, 2 do
        if fields[i] == 'queue' then
          queue = fields[i + 1]
        end
      end
      if queue then
        redis.call('XADD', ARGV[3] .. queue, '*', unpack(fields))
        moved = moved + 1
      end
      redis.call('DEL', key)
    end
  end
end
return moved
"#;

const PROMOTE_BATCH: usize = 100;
const LEASE_EXPIRED: &str = "lease expired";

#[derive(Debug, Clone)]
pub struct RedisBrokerConfig {
    pub stream_prefix: String,
    pub group: String,
    /// 本进程的消费者名称，同一组内必须唯一
    pub consumer: String,
    pub lease_timeout: Duration,
    pub backoff: Backoff,
}

impl Default for RedisBrokerConfig {
    fn default() -> Self {
        Self {
            stream_prefix: "chatroom:tasks".to_string(),
            group: "workers".to_string(),
            consumer: format!("consumer-{}", uuid::Uuid::new_v4()),
            lease_timeout: Duration::from_secs(30),
            backoff: Backoff::default(),
        }
    }
}

fn broker_error(err: redis::RedisError) -> QueueError {
    QueueError::broker(err.to_string())
}

fn xadd(stream: &str, fields: Vec<(&'static str, Vec<u8>)>) -> Cmd {
    let mut cmd = redis::cmd("XADD");
    cmd.arg(stream).arg("*");
    for (name, value) in fields {
        cmd.arg(name).arg(value);
    }
    cmd
}

fn dead_fields(envelope: &TaskEnvelope, reason: &str) -> Vec<(&'static str, Vec<u8>)> {
    let mut fields = encode_fields(envelope);
    fields.push(("reason", reason.as_bytes().to_vec()));
    fields.push(("archived_at", Utc::now().to_rfc3339().into_bytes()));
    fields
}

pub struct RedisTaskBroker {
    client: redis::Client,
    manager: ConnectionManager,
    config: RedisBrokerConfig,
    promote: Script,
    /// 已确认存在消费者组的 Stream
    ensured: Mutex<HashSet<String>>,
    /// 阻塞读取用的空闲连接，每个并发出队占用一条，出错时丢弃
    blocking: Mutex<Vec<MultiplexedConnection>>,
}

impl RedisTaskBroker {
    pub async fn connect(url: &str, config: RedisBrokerConfig) -> Result<Self, QueueError> {
        let client = redis::Client::open(url).map_err(broker_error)?;
        let manager = ConnectionManager::new(client.clone())
            .await
            .map_err(broker_error)?;

        info!(
            stream_prefix = %config.stream_prefix,
            group = %config.group,
            consumer = %config.consumer,
            "Redis 任务存储已连接"
        );

        Ok(Self {
            client,
            manager,
            config,
            promote: Script::new(PROMOTE_SCRIPT),
            ensured: Mutex::new(HashSet::new()),
            blocking: Mutex::new(Vec::new()),
        })
    }

    fn stream_key(&self, queue: &str) -> String {
        format!("{}:queue:{}", self.config.stream_prefix, queue)
    }

    fn scheduled_key(&self) -> String {
        format!("{}:scheduled", self.config.stream_prefix)
    }

    fn task_key(&self, envelope: &TaskEnvelope) -> String {
        format!("{}:task:{}", self.config.stream_prefix, envelope.id)
    }

    fn dead_key(&self) -> String {
        format!("{}:dead", self.config.stream_prefix)
    }

    /// 创建消费者组，组已存在（BUSYGROUP）不是错误
    async fn ensure_group(&self, stream: &str) -> Result<(), QueueError> {
        if self
            .ensured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(stream)
        {
            return Ok(());
        }

        let mut conn = self.manager.clone();
        let result: Result<String, redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(&self.config.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!(stream, group = %self.config.group, "消费者组已创建"),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(stream, group = %self.config.group, "消费者组已存在");
            }
            Err(e) => return Err(broker_error(e)),
        }

        self.ensured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(stream.to_owned());
        Ok(())
    }

    async fn promote_due(&self) -> Result<usize, QueueError> {
        let mut conn = self.manager.clone();
        let moved: usize = self
            .promote
            .key(self.scheduled_key())
            .arg(Utc::now().timestamp_millis())
            .arg(format!("{}:task:", self.config.stream_prefix))
            .arg(format!("{}:queue:", self.config.stream_prefix))
            .arg(PROMOTE_BATCH)
            .invoke_async(&mut conn)
            .await
            .map_err(broker_error)?;
        if moved > 0 {
            debug!(moved, "延迟任务已到期");
        }
        Ok(moved)
    }

    /// 领取一个租约已超时的条目
    async fn claim_expired(&self, stream: &str) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.manager.clone();
        let reply: Value = redis::cmd("XAUTOCLAIM")
            .arg(stream)
            .arg(&self.config.group)
            .arg(&self.config.consumer)
            .arg(self.config.lease_timeout.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(broker_error)?;

        for (entry_id, fields) in parse_autoclaim(reply) {
            let mut delivery = match self.to_delivery(&entry_id, &fields) {
                Ok(delivery) => delivery,
                Err(err) => {
                    self.bury_corrupt(stream, &entry_id, &err).await?;
                    continue;
                }
            };

            // 投递计数包含首次读取，之后每次领取加一
            let reclaims = self.delivery_count(stream, &entry_id).await?.saturating_sub(1);
            let envelope = &mut delivery.envelope;
            envelope.retry_count = envelope
                .retry_count
                .saturating_add(u32::try_from(reclaims).unwrap_or(u32::MAX));
            envelope.last_error = Some(LEASE_EXPIRED.to_owned());

            if envelope.retry_count > envelope.max_retry {
                error!(
                    task_id = %envelope.id,
                    stream,
                    retry_count = envelope.retry_count,
                    "任务租约超时且重试次数耗尽，进入死信"
                );
                envelope.retry_count = envelope.max_retry;
                self.archive(delivery, LEASE_EXPIRED).await?;
                continue;
            }

            warn!(
                task_id = %delivery.envelope.id,
                stream,
                retry_count = delivery.envelope.retry_count,
                "任务租约超时，重新领取"
            );
            return Ok(Some(delivery));
        }
        Ok(None)
    }

    /// 条目在消费者组中的投递次数
    async fn delivery_count(&self, stream: &str, entry_id: &str) -> Result<u64, QueueError> {
        let mut conn = self.manager.clone();
        let reply: Value = redis::cmd("XPENDING")
            .arg(stream)
            .arg(&self.config.group)
            .arg(entry_id)
            .arg(entry_id)
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(broker_error)?;
        Ok(parse_delivery_count(reply).unwrap_or(1))
    }

    /// 取一条阻塞读取专用的连接，池中没有时新建
    async fn blocking_connection(&self) -> Result<MultiplexedConnection, QueueError> {
        let pooled = self
            .blocking
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        match pooled {
            Some(conn) => Ok(conn),
            None => {
                debug!("新建阻塞读取连接");
                self.client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(broker_error)
            }
        }
    }

    fn release_connection(&self, conn: MultiplexedConnection) {
        self.blocking
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(conn);
    }

    /// 读取一个新条目。多个 Stream 同时有数据时只保留优先级最高的一条，
    /// 其余条目原子地放回各自 Stream 的队尾，不留在本进程里。
    async fn read_new(
        &self,
        streams: &[String],
        block: Option<Duration>,
    ) -> Result<Option<Delivery>, QueueError> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.config.group)
            .arg(&self.config.consumer)
            .arg("COUNT")
            .arg(1);
        if let Some(block) = block {
            // BLOCK 0 表示永久等待
            cmd.arg("BLOCK").arg((block.as_millis() as u64).max(1));
        }
        cmd.arg("STREAMS");
        for stream in streams {
            cmd.arg(stream);
        }
        for _ in streams {
            cmd.arg(">");
        }

        let result: Result<Option<StreamReadReply>, redis::RedisError> = if block.is_some() {
            // 阻塞命令会占住整条连接，不能用共享的连接
            let mut conn = self.blocking_connection().await?;
            let result = cmd.query_async(&mut conn).await;
            if result.is_ok() {
                self.release_connection(conn);
            }
            result
        } else {
            let mut conn = self.manager.clone();
            cmd.query_async(&mut conn).await
        };

        let reply = match result {
            Ok(reply) => reply,
            Err(err) => {
                if err.to_string().contains("NOGROUP") {
                    // Stream 被外部删除，下次重新创建消费者组
                    self.ensured
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .clear();
                }
                return Err(broker_error(err));
            }
        };
        let Some(mut reply) = reply else {
            return Ok(None);
        };

        reply
            .keys
            .sort_by_key(|key| streams.iter().position(|stream| *stream == key.key));

        let mut first = None;
        let mut extras = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                match self.to_delivery(&entry.id, &entry.map) {
                    Ok(delivery) if first.is_none() => first = Some(delivery),
                    Ok(delivery) => extras.push(delivery),
                    Err(err) => self.bury_corrupt(&key.key, &entry.id, &err).await?,
                }
            }
        }

        if !extras.is_empty() {
            self.requeue(&extras).await?;
        }
        Ok(first)
    }

    /// 把已读到但不在本次处理的条目放回队尾
    async fn requeue(&self, deliveries: &[Delivery]) -> Result<(), QueueError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for delivery in deliveries {
            let stream = self.stream_key(&delivery.envelope.queue);
            pipe.add_command(xadd(&stream, encode_fields(&delivery.envelope)))
                .ignore();
            self.ack_commands(&mut pipe, delivery);
        }

        let mut conn = self.manager.clone();
        let _: () = pipe.query_async(&mut conn).await.map_err(broker_error)?;
        debug!(count = deliveries.len(), "多读到的条目已放回队列");
        Ok(())
    }

    fn to_delivery(
        &self,
        entry_id: &str,
        fields: &HashMap<String, Value>,
    ) -> Result<Delivery, CodecError> {
        Ok(Delivery {
            envelope: decode_fields(fields)?,
            receipt: entry_id.to_owned(),
        })
    }

    /// 无法解析的条目直接移入死信，避免反复被领取
    async fn bury_corrupt(
        &self,
        stream: &str,
        entry_id: &str,
        err: &CodecError,
    ) -> Result<(), QueueError> {
        error!(stream, entry_id, error = %err, "无法解析的任务条目，移入死信");

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("XADD")
            .arg(self.dead_key())
            .arg("*")
            .arg("entry_id")
            .arg(entry_id)
            .arg("stream")
            .arg(stream)
            .arg("reason")
            .arg(err.to_string())
            .ignore()
            .cmd("XACK")
            .arg(stream)
            .arg(&self.config.group)
            .arg(entry_id)
            .ignore()
            .cmd("XDEL")
            .arg(stream)
            .arg(entry_id)
            .ignore();

        let mut conn = self.manager.clone();
        let _: () = pipe.query_async(&mut conn).await.map_err(broker_error)?;
        Ok(())
    }

    /// 写入延迟集合，到期后由 `promote_due` 搬回队列
    fn schedule_commands(&self, pipe: &mut redis::Pipeline, envelope: &TaskEnvelope, due: DateTime<Utc>) {
        let task_key = self.task_key(envelope);
        let mut hset = redis::cmd("HSET");
        hset.arg(&task_key);
        for (name, value) in encode_fields(envelope) {
            hset.arg(name).arg(value);
        }
        pipe.add_command(hset)
            .ignore()
            .cmd("ZADD")
            .arg(self.scheduled_key())
            .arg(due.timestamp_millis())
            .arg(envelope.id.to_string())
            .ignore();
    }

    fn ack_commands(&self, pipe: &mut redis::Pipeline, delivery: &Delivery) {
        let stream = self.stream_key(&delivery.envelope.queue);
        pipe.cmd("XACK")
            .arg(&stream)
            .arg(&self.config.group)
            .arg(&delivery.receipt)
            .ignore()
            .cmd("XDEL")
            .arg(&stream)
            .arg(&delivery.receipt)
            .ignore();
    }

    /// 最近的死信任务，按时间倒序
    pub async fn dead_tasks(&self, count: usize) -> Result<Vec<DeadTask>, QueueError> {
        let mut conn = self.manager.clone();
        let reply: StreamRangeReply = redis::cmd("XREVRANGE")
            .arg(self.dead_key())
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(broker_error)?;

        let tasks = reply
            .ids
            .into_iter()
            .filter_map(|entry| {
                let envelope = decode_fields(&entry.map).ok()?;
                let reason: String = entry.get("reason").unwrap_or_default();
                let archived_at = entry
                    .get::<String>("archived_at")
                    .and_then(|at| DateTime::parse_from_rfc3339(&at).ok())
                    .map(|at| at.with_timezone(&Utc))
                    .unwrap_or(envelope.enqueued_at);
                Some(DeadTask {
                    envelope,
                    reason,
                    archived_at,
                })
            })
            .collect();
        Ok(tasks)
    }
}

#[async_trait]
impl TaskBroker for RedisTaskBroker {
    async fn enqueue(
        &self,
        envelope: TaskEnvelope,
        delay: Option<Duration>,
    ) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        match delay {
            Some(delay) if !delay.is_zero() => {
                let delay = chrono::Duration::from_std(delay)
                    .map_err(|err| QueueError::broker(err.to_string()))?;
                let mut pipe = redis::pipe();
                pipe.atomic();
                self.schedule_commands(&mut pipe, &envelope, Utc::now() + delay);
                let _: () = pipe.query_async(&mut conn).await.map_err(broker_error)?;
            }
            _ => {
                let stream = self.stream_key(&envelope.queue);
                let _: String = xadd(&stream, encode_fields(&envelope))
                    .query_async(&mut conn)
                    .await
                    .map_err(broker_error)?;
            }
        }
        Ok(())
    }

    async fn dequeue(
        &self,
        queues: &[String],
        wait: Duration,
    ) -> Result<Option<Delivery>, QueueError> {
        let streams: Vec<String> = queues.iter().map(|queue| self.stream_key(queue)).collect();
        for stream in &streams {
            self.ensure_group(stream).await?;
        }

        self.promote_due().await?;

        for stream in &streams {
            if let Some(delivery) = self.claim_expired(stream).await? {
                return Ok(Some(delivery));
            }
        }

        // 先按优先级逐个 Stream 非阻塞读取，都为空时再阻塞等待
        for stream in &streams {
            if let Some(delivery) = self.read_new(std::slice::from_ref(stream), None).await? {
                return Ok(Some(delivery));
            }
        }
        if wait.is_zero() {
            return Ok(None);
        }
        self.read_new(&streams, Some(wait)).await
    }

    async fn complete(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        self.ack_commands(&mut pipe, delivery);

        let mut conn = self.manager.clone();
        let _: () = pipe.query_async(&mut conn).await.map_err(broker_error)?;
        Ok(())
    }

    async fn fail(&self, delivery: Delivery, error: &str) -> Result<FailureOutcome, QueueError> {
        let outcome = failure_outcome(&delivery.envelope, &self.config.backoff);

        let mut envelope = delivery.envelope.clone();
        envelope.last_error = Some(error.to_owned());

        let mut pipe = redis::pipe();
        pipe.atomic();
        match outcome {
            FailureOutcome::Retrying { attempt, delay } => {
                envelope.retry_count = attempt;
                let delay = chrono::Duration::from_std(delay)
                    .map_err(|err| QueueError::broker(err.to_string()))?;
                self.schedule_commands(&mut pipe, &envelope, Utc::now() + delay);
            }
            FailureOutcome::Dead => {
                pipe.add_command(xadd(&self.dead_key(), dead_fields(&envelope, error)))
                    .ignore();
            }
        }
        self.ack_commands(&mut pipe, &delivery);

        let mut conn = self.manager.clone();
        let _: () = pipe.query_async(&mut conn).await.map_err(broker_error)?;
        Ok(outcome)
    }

    async fn archive(&self, delivery: Delivery, reason: &str) -> Result<(), QueueError> {
        let mut envelope = delivery.envelope.clone();
        envelope.last_error = Some(reason.to_owned());

        let mut pipe = redis::pipe();
        pipe.atomic()
            .add_command(xadd(&self.dead_key(), dead_fields(&envelope, reason)))
            .ignore();
        self.ack_commands(&mut pipe, &delivery);

        let mut conn = self.manager.clone();
        let _: () = pipe.query_async(&mut conn).await.map_err(broker_error)?;
        Ok(())
    }
}
