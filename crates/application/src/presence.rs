//! 在线连接表（Presence Hub）
//!
//! 进程内维护 `UserId -> Connection` 映射，为 WebSocket 处理器提供 join/leave，
//! 为后台任务提供定向推送和广播。整张表由一把读写锁保护：join/leave 获取写锁，
//! 推送、广播、计数获取读锁。推送全部是非阻塞的，慢连接只会丢事件，不会拖住整张表。

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};

use domain::{ConnectionId, Timestamp, UserId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::transport::{Audience, PushError, PushEvent, PushTransport};

/// 出站句柄：能把序列化后的事件推给一个实时连接
pub trait Outbound: Send + Sync {
    /// 非阻塞推送。缓冲区已满返回 `Saturated`，连接已关闭返回 `Closed`。
    fn try_push(&self, payload: &str) -> Result<(), PushError>;

    /// 关闭句柄，重复调用必须是无操作
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// 基于有界 mpsc 通道的出站句柄，接收端由连接的写任务持有
#[derive(Debug)]
pub struct ChannelOutbound {
    sender: Mutex<Option<mpsc::Sender<String>>>,
}

impl ChannelOutbound {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                sender: Mutex::new(Some(tx)),
            },
            rx,
        )
    }
}

impl Outbound for ChannelOutbound {
    fn try_push(&self, payload: &str) -> Result<(), PushError> {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = guard.as_ref().ok_or(PushError::Closed)?;
        sender.try_send(payload.to_owned()).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => PushError::Saturated,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }

    fn close(&self) {
        // 丢弃发送端后，写任务的 recv() 返回 None 并自行退出
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(true, |sender| sender.is_closed())
    }
}

/// 在线表中的一条连接，独占出站句柄
pub struct Connection {
    id: ConnectionId,
    outbound: Box<dyn Outbound>,
    connected_at: Timestamp,
}

impl Connection {
    fn new(outbound: Box<dyn Outbound>) -> Self {
        Self {
            id: ConnectionId::new(),
            outbound,
            connected_at: chrono::Utc::now(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn connected_at(&self) -> Timestamp {
        self.connected_at
    }

    /// 消费连接并关闭句柄，保证每条连接只关闭一次
    fn close(self) {
        self.outbound.close();
    }
}

/// 定向推送未送达的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushMiss {
    /// 用户不在线
    Offline,
    /// 在线但传输层拒绝（已满或已关闭）
    Transport(PushError),
}

/// 在线连接表
#[derive(Default)]
pub struct PresenceHub {
    connections: RwLock<HashMap<UserId, Connection>>,
}

impl PresenceHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册连接。用户已有连接时关闭旧句柄并替换，同一用户只保留一个活动会话。
    pub fn join(&self, user_id: UserId, outbound: Box<dyn Outbound>) -> ConnectionId {
        let connection = Connection::new(outbound);
        let connection_id = connection.id();

        let replaced = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id, connection);

        // 在锁外关闭旧句柄
        if let Some(stale) = replaced {
            info!(user_id = %user_id, stale_connection = %stale.id(), "替换用户的旧连接");
            stale.close();
        }

        info!(user_id = %user_id, connection_id = %connection_id, "用户上线");
        connection_id
    }

    /// 移除用户的连接并关闭句柄。用户不在线时为无操作，返回 false。
    pub fn leave(&self, user_id: UserId) -> bool {
        let removed = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user_id);

        match removed {
            Some(connection) => {
                connection.close();
                info!(user_id = %user_id, "用户下线");
                true
            }
            None => false,
        }
    }

    /// 仅当表中仍是指定连接时才移除。
    ///
    /// 连接被新会话替换后，旧 socket 的清理逻辑调用这里不会误删新连接。
    pub fn leave_connection(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        let removed = {
            let mut connections = self
                .connections
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            match connections.get(&user_id) {
                Some(current) if current.id() == connection_id => connections.remove(&user_id),
                _ => None,
            }
        };

        match removed {
            Some(connection) => {
                connection.close();
                info!(user_id = %user_id, connection_id = %connection_id, "用户下线");
                true
            }
            None => false,
        }
    }

    /// 定向推送，区分离线与传输失败
    pub fn try_send_to(&self, user_id: UserId, event: &PushEvent) -> Result<(), PushMiss> {
        let payload = event.to_json().map_err(PushMiss::Transport)?;

        let connections = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(connection) = connections.get(&user_id) else {
            debug!(user_id = %user_id, "用户不在线，跳过推送");
            return Err(PushMiss::Offline);
        };

        connection.outbound.try_push(&payload).map_err(|err| {
            warn!(user_id = %user_id, error = %err, "推送被传输层丢弃");
            PushMiss::Transport(err)
        })
    }

    /// 定向推送，只关心是否送达
    pub fn send_to(&self, user_id: UserId, event: &PushEvent) -> bool {
        self.try_send_to(user_id, event).is_ok()
    }

    /// 推送给所有在线连接，返回成功数量。单个连接失败不影响其它连接。
    pub fn broadcast(&self, event: &PushEvent) -> usize {
        let payload = match event.to_json() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "广播事件序列化失败");
                return 0;
            }
        };

        let connections = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut delivered = 0;
        let mut failed = 0;
        for (user_id, connection) in connections.iter() {
            match connection.outbound.try_push(&payload) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    failed += 1;
                    debug!(user_id = %user_id, error = %err, "广播到单个连接失败");
                }
            }
        }

        if failed > 0 {
            warn!(delivered, failed, "广播部分失败");
        }
        delivered
    }

    /// 当前在线连接数快照
    pub fn count(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&user_id)
    }

    /// 在线用户列表（按 ID 排序）
    pub fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        users.sort();
        users
    }
}

impl PushTransport for PresenceHub {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn push(&self, audience: Audience, event: &PushEvent) -> usize {
        match audience {
            Audience::User(user_id) => usize::from(self.send_to(user_id, event)),
            Audience::Everyone => self.broadcast(event),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use chrono::Utc;
    use domain::{NewNotification, NotificationId};

    /// 记录推送内容与关闭次数的测试句柄
    #[derive(Default)]
    pub(crate) struct CountingOutbound {
        pub(crate) pushed: Mutex<Vec<String>>,
        pub(crate) closes: AtomicUsize,
        pub(crate) closed: AtomicBool,
    }

    impl Outbound for Arc<CountingOutbound> {
        fn try_push(&self, payload: &str) -> Result<(), PushError> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(PushError::Closed);
            }
            self.pushed.lock().unwrap().push(payload.to_owned());
            Ok(())
        }

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.closed.store(true, Ordering::SeqCst);
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    fn event() -> PushEvent {
        PushEvent::Notification(
            NewNotification::new(UserId::new(9), UserId::new(1), "ping")
                .into_record(NotificationId::new(1), Utc::now()),
        )
    }

    #[test]
    fn join_then_send_delivers_on_the_handle() {
        let hub = PresenceHub::new();
        let handle = Arc::new(CountingOutbound::default());
        hub.join(UserId::new(1), Box::new(handle.clone()));

        assert!(hub.send_to(UserId::new(1), &event()));
        assert_eq!(handle.pushed.lock().unwrap().len(), 1);
        assert_eq!(hub.count(), 1);
    }

    #[test]
    fn leave_closes_exactly_once_and_is_idempotent() {
        let hub = PresenceHub::new();
        let handle = Arc::new(CountingOutbound::default());
        hub.join(UserId::new(1), Box::new(handle.clone()));

        assert!(hub.leave(UserId::new(1)));
        assert!(!hub.leave(UserId::new(1)));

        assert_eq!(
            hub.try_send_to(UserId::new(1), &event()),
            Err(PushMiss::Offline)
        );
        assert_eq!(handle.closes.load(Ordering::SeqCst), 1);
        assert_eq!(hub.count(), 0);
    }

    #[test]
    fn broadcast_skips_closed_connection() {
        let hub = PresenceHub::new();
        let handles: Vec<_> = (0..4)
            .map(|_| Arc::new(CountingOutbound::default()))
            .collect();
        for (index, handle) in handles.iter().enumerate() {
            hub.join(UserId::new(index as i64 + 1), Box::new(handle.clone()));
        }
        handles[2].closed.store(true, Ordering::SeqCst);

        assert_eq!(hub.broadcast(&event()), 3);
        assert_eq!(handles[0].pushed.lock().unwrap().len(), 1);
        assert!(handles[2].pushed.lock().unwrap().is_empty());
    }

    #[test]
    fn rejoin_closes_stale_handle_and_replaces_it() {
        let hub = PresenceHub::new();
        let first = Arc::new(CountingOutbound::default());
        let second = Arc::new(CountingOutbound::default());

        let stale_id = hub.join(UserId::new(1), Box::new(first.clone()));
        let fresh_id = hub.join(UserId::new(1), Box::new(second.clone()));

        assert_eq!(first.closes.load(Ordering::SeqCst), 1);
        assert_eq!(hub.count(), 1);

        // 旧连接的清理不能移除新连接
        assert!(!hub.leave_connection(UserId::new(1), stale_id));
        assert!(hub.send_to(UserId::new(1), &event()));
        assert_eq!(second.pushed.lock().unwrap().len(), 1);

        assert!(hub.leave_connection(UserId::new(1), fresh_id));
        assert_eq!(second.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn saturated_channel_reports_transport_miss() {
        let hub = PresenceHub::new();
        let (outbound, mut receiver) = ChannelOutbound::channel(1);
        hub.join(UserId::new(1), Box::new(outbound));

        assert!(hub.send_to(UserId::new(1), &event()));
        assert_eq!(
            hub.try_send_to(UserId::new(1), &event()),
            Err(PushMiss::Transport(PushError::Saturated))
        );

        assert!(receiver.try_recv().is_ok());
        assert!(hub.send_to(UserId::new(1), &event()));
    }

    #[test]
    fn channel_outbound_close_is_idempotent() {
        let (outbound, mut receiver) = ChannelOutbound::channel(4);
        assert!(!outbound.is_closed());

        outbound.close();
        outbound.close();

        assert!(outbound.is_closed());
        assert_eq!(outbound.try_push("x"), Err(PushError::Closed));
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn online_users_are_sorted() {
        let hub = PresenceHub::new();
        for id in [3, 1, 2] {
            hub.join(UserId::new(id), Box::new(Arc::new(CountingOutbound::default())));
        }
        assert_eq!(
            hub.online_users(),
            vec![UserId::new(1), UserId::new(2), UserId::new(3)]
        );
        assert!(hub.is_online(UserId::new(2)));
    }
}
