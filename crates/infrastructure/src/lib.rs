//! 基础设施层实现。
//!
//! 提供 Redis 任务存储、PostgreSQL 仓储、bcrypt 密码哈希和邮件网关等适配器，实现应用/领域层定义的接口。

pub mod builder;
pub mod mailer;
pub mod migrations;
pub mod password;
pub mod redis;
pub mod repository;

pub use builder::{build_mailer, Infrastructure, InfrastructureConfig, InfrastructureError, MailSettings};
pub use mailer::{HttpMailer, LogMailer};
pub use migrations::MIGRATOR;
pub use password::BcryptPasswordHasher;
pub use self::redis::{RedisBrokerConfig, RedisTaskBroker};
pub use repository::{
    create_pg_pool, PgAccountRepository, PgFriendshipRepository, PgMessageRepository,
    PgNotificationRepository, PgStorage,
};
