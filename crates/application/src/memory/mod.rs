//! 内存中的协作方实现，供测试和本地开发使用

mod broker;
mod mailer;
mod password;
mod repositories;

pub use broker::MemoryTaskBroker;
pub use mailer::{RecordingMailer, SentMail};
pub use password::MemoryPasswordHasher;
pub use repositories::{
    MemoryAccountRepository, MemoryFriendshipRepository, MemoryMessageRepository,
    MemoryNotificationRepository,
};
