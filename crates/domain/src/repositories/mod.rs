//! Repository接口定义
//!
//! 持久化是外部协作方：核心只依赖这里的抽象接口，由基础设施层实现。

pub mod account_repository;
pub mod friendship_repository;
pub mod message_repository;
pub mod notification_repository;

pub use account_repository::AccountRepository;
pub use friendship_repository::FriendshipRepository;
pub use message_repository::MessageRepository;
pub use notification_repository::NotificationRepository;
