mod account_service;
mod friendship_service;
mod message_service;
mod online_users;

pub use account_service::{AccountService, AccountServiceDependencies, RegisterRequest};
pub use friendship_service::{FriendRequest, FriendshipService, FriendshipServiceDependencies};
pub use message_service::{MessageService, MessageServiceDependencies, SendMessageRequest};
pub use online_users::{OnlineReport, OnlineUsersService};
