#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use application::memory::{
    MemoryAccountRepository, MemoryFriendshipRepository, MemoryMessageRepository,
    MemoryPasswordHasher, MemoryTaskBroker,
};
use application::{
    AccountService, AccountServiceDependencies, FriendshipService, FriendshipServiceDependencies,
    MessageService, MessageServiceDependencies, NotificationFeed, OnlineUsersService,
    PresenceHub, QueueSettings, RateLimiter, TaskDistributor,
};
use axum::Router;
use domain::{Account, UserId};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use web_api::{router, AppState, JwtConfig, JwtService};

pub const SECRET: &str = "integration-test-secret-with-32-characters";

/// 使用内存协作方组装的完整路由
pub struct TestApp {
    pub state: AppState,
    pub broker: Arc<MemoryTaskBroker>,
    pub messages: Arc<MemoryMessageRepository>,
    pub accounts: Arc<MemoryAccountRepository>,
    pub friendships: Arc<MemoryFriendshipRepository>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_limit(1_000, Duration::from_secs(60))
    }

    pub fn with_limit(capacity: u32, refill_interval: Duration) -> Self {
        let accounts = Arc::new(MemoryAccountRepository::with_accounts([
            Account::new(UserId::new(1), "alice", "alice@example.com"),
            Account::new(UserId::new(2), "bob", "bob@example.com"),
        ]));
        let messages = Arc::new(MemoryMessageRepository::new());
        let broker = Arc::new(MemoryTaskBroker::default());
        let friendships = Arc::new(MemoryFriendshipRepository::new());
        let hub = Arc::new(PresenceHub::new());
        let distributor = TaskDistributor::new(broker.clone(), QueueSettings::defaults());

        let account_service = AccountService::new(AccountServiceDependencies {
            accounts: accounts.clone(),
            password_hasher: Arc::new(MemoryPasswordHasher),
            distributor: distributor.clone(),
        });
        let friendship_service = FriendshipService::new(FriendshipServiceDependencies {
            accounts: accounts.clone(),
            friendships: friendships.clone(),
            distributor: distributor.clone(),
        });
        let message_service = MessageService::new(MessageServiceDependencies {
            accounts: accounts.clone(),
            messages: messages.clone(),
            distributor,
        });

        let state = AppState {
            account_service: Arc::new(account_service),
            friendship_service: Arc::new(friendship_service),
            message_service: Arc::new(message_service),
            online_users: Arc::new(OnlineUsersService::new(hub.clone(), accounts.clone())),
            hub,
            feed: Arc::new(NotificationFeed::default()),
            limiter: Arc::new(RateLimiter::new(capacity, refill_interval)),
            jwt_service: Arc::new(JwtService::new(JwtConfig {
                secret: SECRET.into(),
                expiration_hours: 1,
            })),
            outbound_buffer: 8,
            cors_origins: vec!["*".into()],
            shutdown: CancellationToken::new(),
        };

        Self {
            state,
            broker,
            messages,
            accounts,
            friendships,
        }
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    pub fn token(&self, user_id: i64) -> String {
        self.state
            .jwt_service
            .generate_token(UserId::new(user_id))
            .expect("token")
    }

    /// 在随机端口上启动服务，返回地址与关闭句柄
    pub async fn serve(&self) -> (String, oneshot::Sender<()>) {
        let (addr, shutdown, _server) = self.serve_with_handle().await;
        (addr, shutdown)
    }

    /// 同 `serve`，另外返回服务任务，用于观察优雅关闭何时完成。
    /// 关闭信号先取消共享的关闭令牌，再等待连接排空，与二进制入口一致。
    pub async fn serve_with_handle(&self) -> (String, oneshot::Sender<()>, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = self.router();
        let token = self.state.shutdown.clone();

        let server = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                    token.cancel();
                })
                .await
                .ok();
        });

        (addr.to_string(), shutdown_tx, server)
    }
}

/// 轮询直到条件成立或超时
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
