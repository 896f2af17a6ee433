use std::sync::Arc;

use application::{
    AccountService, FriendshipService, MessageService, NotificationFeed, OnlineUsersService,
    PresenceHub, RateLimiter,
};

use tokio_util::sync::CancellationToken;

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub account_service: Arc<AccountService>,
    pub friendship_service: Arc<FriendshipService>,
    pub message_service: Arc<MessageService>,
    pub online_users: Arc<OnlineUsersService>,
    pub hub: Arc<PresenceHub>,
    pub feed: Arc<NotificationFeed>,
    pub limiter: Arc<RateLimiter>,
    pub jwt_service: Arc<JwtService>,
    /// 每条 WebSocket 连接的发送缓冲条数
    pub outbound_buffer: usize,
    /// 允许的跨域来源，`*` 表示任意
    pub cors_origins: Vec<String>,
    /// 进程关闭信号，SSE 与 WebSocket 长连接在取消后结束
    pub shutdown: CancellationToken,
}
