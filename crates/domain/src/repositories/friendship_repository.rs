//! 好友关系Repository接口定义

use async_trait::async_trait;

use crate::entities::{Friendship, FriendshipStatus};
use crate::errors::RepositoryError;
use crate::value_objects::{FriendshipId, UserId};

#[async_trait]
pub trait FriendshipRepository: Send + Sync {
    /// 创建一条待处理的好友请求
    async fn create(
        &self,
        requester_id: UserId,
        addressee_id: UserId,
    ) -> Result<Friendship, RepositoryError>;

    async fn find_by_id(&self, id: FriendshipId) -> Result<Friendship, RepositoryError>;

    async fn update_status(
        &self,
        id: FriendshipId,
        status: FriendshipStatus,
    ) -> Result<Friendship, RepositoryError>;
}
