//! Redis 任务存储
//!
//! 用 Stream 消费者组实现持久化、至少一次投递的任务队列。

mod broker;
mod codec;

pub use broker::{RedisBrokerConfig, RedisTaskBroker};
