//! 领域实体定义
//!
//! 包含系统的核心实体：账户、好友关系、消息、通知。

pub mod account;
pub mod friendship;
pub mod message;
pub mod notification;

// 重新导出核心实体
pub use account::{Account, NewAccount, MAX_USERNAME_LENGTH};
pub use friendship::{Friendship, FriendshipStatus};
pub use message::{ChatMessage, ChatType, NewMessage, MAX_CONTENT_LENGTH};
pub use notification::{NewNotification, NotificationRecord, NotificationStatus};
