//! 主应用程序入口
//!
//! 启动后台任务处理器与 Axum Web API 服务，收到 ctrl-c 后两者一起退出。

use std::sync::Arc;
use std::time::Duration;

use application::{
    AccountService, AccountServiceDependencies, Backoff, DeliveryDependencies,
    DeliveryOrchestrator, FriendshipService, FriendshipServiceDependencies, MessageService,
    MessageServiceDependencies, NotificationFeed, OnlineUsersService, PresenceHub,
    ProcessorConfig, QueueSettings, RateLimiter, TaskDistributor, TaskProcessor,
};
use config::AppConfig;
use infrastructure::{Infrastructure, InfrastructureConfig, MailSettings, RedisBrokerConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::load()?;
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        queues = ?config.task_queue.queue_names(),
        "配置已加载"
    );

    let infrastructure = Infrastructure::connect(infrastructure_config(&config)).await?;
    let storage = infrastructure.storage.clone();

    let hub = Arc::new(PresenceHub::new());
    let feed = Arc::new(NotificationFeed::new(config.feed.subscriber_buffer));
    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit.capacity,
        config.rate_limit.refill_interval(),
    ));

    let queues = config
        .task_queue
        .queues
        .iter()
        .map(|queue| QueueSettings::new(queue.name.clone(), queue.max_retry))
        .collect();
    let distributor = TaskDistributor::new(infrastructure.broker.clone(), queues);

    // 后台任务处理器
    let orchestrator = Arc::new(DeliveryOrchestrator::new(DeliveryDependencies {
        hub: hub.clone(),
        feed: feed.clone(),
        notifications: storage.notification_repository.clone(),
        accounts: storage.account_repository.clone(),
        mailer: infrastructure.mailer.clone(),
    }));
    let mut processor = TaskProcessor::new(
        infrastructure.broker.clone(),
        ProcessorConfig {
            queues: config.task_queue.queue_names(),
            concurrency: config.task_queue.concurrency,
            poll_timeout: config.task_queue.block_timeout(),
        },
    );
    orchestrator.register(&mut processor);

    let shutdown = CancellationToken::new();
    let processor_handle = tokio::spawn(processor.start(shutdown.clone()));

    // 创建应用状态
    let account_service = AccountService::new(AccountServiceDependencies {
        accounts: storage.account_repository.clone(),
        password_hasher: infrastructure.password_hasher.clone(),
        distributor: distributor.clone(),
    });
    let friendship_service = FriendshipService::new(FriendshipServiceDependencies {
        accounts: storage.account_repository.clone(),
        friendships: storage.friendship_repository.clone(),
        distributor: distributor.clone(),
    });
    let message_service = MessageService::new(MessageServiceDependencies {
        accounts: storage.account_repository.clone(),
        messages: storage.message_repository.clone(),
        distributor,
    });
    let state = AppState {
        account_service: Arc::new(account_service),
        friendship_service: Arc::new(friendship_service),
        message_service: Arc::new(message_service),
        online_users: Arc::new(OnlineUsersService::new(
            hub.clone(),
            storage.account_repository.clone(),
        )),
        hub,
        feed,
        limiter,
        jwt_service: Arc::new(JwtService::new(config.jwt.clone())),
        outbound_buffer: config.hub.outbound_buffer,
        cors_origins: config.server.cors_origins.clone(),
        shutdown: shutdown.clone(),
    };

    // 启动 Web 服务器
    let app = router(state);
    let listener =
        tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
    tracing::info!(addr = %listener.local_addr()?, "聊天室服务器已启动");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // 处理器会先完成正在执行的任务
    processor_handle.await??;
    tracing::info!("服务已停止");

    Ok(())
}

fn infrastructure_config(config: &AppConfig) -> InfrastructureConfig {
    let queue = &config.task_queue;
    InfrastructureConfig {
        database_url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        redis_url: config.redis.url.clone(),
        broker: RedisBrokerConfig {
            stream_prefix: queue.stream_prefix.clone(),
            group: queue.consumer_group.clone(),
            lease_timeout: queue.lease_timeout(),
            backoff: Backoff::exponential(queue.retry_base_delay(), queue.retry_max_delay()),
            ..RedisBrokerConfig::default()
        },
        mail: MailSettings {
            endpoint: config.mail.endpoint.clone(),
            sender: config.mail.sender.clone(),
            timeout: Duration::from_millis(config.mail.timeout_ms),
        },
        bcrypt_cost: config.server.bcrypt_cost,
    }
}

/// ctrl-c 或关闭令牌被取消时开始优雅关闭。
///
/// 令牌在排空连接之前取消，SSE 与 WebSocket 长连接和任务处理器随之结束。
async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::error!(error = %err, "无法监听 ctrl-c 信号");
            }
            tracing::info!("收到关闭信号");
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}
