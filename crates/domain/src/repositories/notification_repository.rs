//! 通知Repository接口定义

use async_trait::async_trait;

use crate::entities::{NewNotification, NotificationRecord};
use crate::errors::RepositoryError;

/// 通知Repository接口
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// 按去重键创建通知。
    ///
    /// 同一个 `dedup_key` 重复调用时返回第一次创建的记录，不会产生新记录，
    /// 这使得被重放的后台任务可以安全地再次执行。
    async fn create_once(
        &self,
        dedup_key: &str,
        notification: NewNotification,
    ) -> Result<NotificationRecord, RepositoryError>;
}
