//! 应用层实现。
//!
//! 实时投递子系统的核心：请求准入的令牌桶、在线连接表与通知订阅集两种扇出、
//! 持久化的后台任务队列，以及把三者串起来的投递编排。
//! 注册与好友请求用例是邮件和通知任务的生产者。
//! 持久化和邮件等外部协作方通过 trait 接入，`memory` 模块提供进程内实现。

pub mod delivery;
pub mod error;
pub mod feed;
pub mod mailer;
pub mod memory;
pub mod password;
pub mod presence;
pub mod rate_limiter;
pub mod services;
pub mod tasks;
pub mod transport;

pub use delivery::{DeliveryDependencies, DeliveryOrchestrator, MessageOutcome};
pub use error::{ApplicationError, ApplicationResult};
pub use feed::{NotificationFeed, Subscription, DEFAULT_SUBSCRIBER_BUFFER};
pub use mailer::{MailError, Mailer};
pub use password::{PasswordHasher, PasswordHasherError};
pub use presence::{ChannelOutbound, Outbound, PresenceHub, PushMiss};
pub use rate_limiter::RateLimiter;
pub use services::{
    AccountService, AccountServiceDependencies, FriendRequest, FriendshipService,
    FriendshipServiceDependencies, MessageService, MessageServiceDependencies, OnlineReport,
    OnlineUsersService, RegisterRequest, SendMessageRequest,
};
pub use tasks::{
    Backoff, EmailPayload, EnqueueOptions, NotificationPayload, ProcessorConfig, QueueError,
    QueueSettings, TaskBroker, TaskDistributor, TaskKind, TaskPayload, TaskProcessor,
};
pub use transport::{Audience, PushError, PushEvent, PushTransport};
