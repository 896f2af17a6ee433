//! 投递编排
//!
//! 后台任务处理器在这里决定一条消息或通知怎么送达：接收者在线时直接推送，
//! 离线时落库为通知并通过订阅集发布。三个任务类型各对应一个处理器。

mod email;
mod message;
mod notification;

use std::sync::Arc;

use domain::{AccountRepository, NotificationRepository};

use crate::feed::NotificationFeed;
use crate::mailer::Mailer;
use crate::presence::PresenceHub;
use crate::tasks::{TaskKind, TaskProcessor};
use crate::transport::PushTransport;

pub use email::{render_welcome_email, SendEmailHandler, WELCOME_SUBJECT};
pub use message::{MessageOutcome, SendMessageHandler};
pub use notification::SendNotificationHandler;

/// 投递编排器依赖
pub struct DeliveryDependencies {
    pub hub: Arc<PresenceHub>,
    pub feed: Arc<NotificationFeed>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub accounts: Arc<dyn AccountRepository>,
    pub mailer: Arc<dyn Mailer>,
}

pub struct DeliveryOrchestrator {
    hub: Arc<PresenceHub>,
    /// 通知要经过的所有推送通道：WebSocket 在线表与 SSE 订阅集
    transports: Vec<Arc<dyn PushTransport>>,
    notifications: Arc<dyn NotificationRepository>,
    accounts: Arc<dyn AccountRepository>,
    mailer: Arc<dyn Mailer>,
}

impl DeliveryOrchestrator {
    pub fn new(deps: DeliveryDependencies) -> Self {
        let transports = vec![
            deps.hub.clone() as Arc<dyn PushTransport>,
            deps.feed as Arc<dyn PushTransport>,
        ];
        Self {
            hub: deps.hub,
            transports,
            notifications: deps.notifications,
            accounts: deps.accounts,
            mailer: deps.mailer,
        }
    }

    /// 为三种投递任务注册处理器
    pub fn register(self: &Arc<Self>, processor: &mut TaskProcessor) {
        processor
            .register(
                TaskKind::SendMessage,
                Arc::new(SendMessageHandler::new(self.clone())),
            )
            .register(
                TaskKind::SendNotification,
                Arc::new(SendNotificationHandler::new(self.clone())),
            )
            .register(
                TaskKind::SendEmail,
                Arc::new(SendEmailHandler::new(self.clone())),
            );
    }
}
