//! 通知订阅集
//!
//! 与在线表相互独立的匿名多播集合，服务 SSE 通知流。发布是不过滤的多播，
//! 每个订阅者拿到所有记录后自行按 `dest_id` 过滤。每个订阅者有一个有界缓冲区，
//! 写满后直接丢弃，慢消费者不会拖住发布方。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use domain::{NotificationRecord, UserId};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::transport::{Audience, PushEvent, PushTransport};

/// 默认的订阅者缓冲区大小
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 10;

pub struct NotificationFeed {
    subscribers: RwLock<HashMap<u64, mpsc::Sender<NotificationRecord>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl NotificationFeed {
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// 注册一个订阅者。返回的 [`Subscription`] 被丢弃时自动注销。
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        debug!(subscriber_id = id, "通知订阅者已注册");

        Subscription {
            id,
            receiver: rx,
            feed: Arc::downgrade(self),
        }
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        let removed = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();
        if removed {
            debug!(subscriber_id = id, "通知订阅者已注销");
        }
        removed
    }

    /// 把记录发给所有订阅者，返回成功写入的订阅者数量
    pub fn publish(&self, record: &NotificationRecord) -> usize {
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let mut delivered = 0;
        for (id, sender) in subscribers.iter() {
            match sender.try_send(record.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(subscriber_id = id, notification_id = %record.id, "订阅者缓冲区已满，丢弃通知");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(subscriber_id = id, "订阅者已关闭");
                }
            }
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for NotificationFeed {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl PushTransport for NotificationFeed {
    fn name(&self) -> &'static str {
        "sse"
    }

    /// 只承载通知事件；受众在消费端过滤，这里总是多播
    fn push(&self, _audience: Audience, event: &PushEvent) -> usize {
        match event.as_notification() {
            Some(record) => self.publish(record),
            None => 0,
        }
    }
}

/// 单个订阅者的接收端
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<NotificationRecord>,
    feed: Weak<NotificationFeed>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<NotificationRecord> {
        self.receiver.recv().await
    }

    /// 等待下一条发给 `user_id` 的通知，其它记录被跳过
    pub async fn recv_for(&mut self, user_id: UserId) -> Option<NotificationRecord> {
        loop {
            let record = self.receiver.recv().await?;
            if record.is_for(user_id) {
                return Some(record);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(feed) = self.feed.upgrade() {
            feed.unsubscribe(self.id);
        }
    }
}
