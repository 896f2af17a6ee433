use std::sync::Arc;

use domain::{
    AccountRepository, DomainError, Friendship, FriendshipId, FriendshipRepository,
    FriendshipStatus, RepositoryError, UserId,
};
use tracing::{error, info, warn};

use crate::error::ApplicationError;
use crate::tasks::{EnqueueOptions, NotificationPayload, TaskDistributor};

#[derive(Debug, Clone)]
pub struct FriendRequest {
    pub sender_id: UserId,
    pub receiver_id: UserId,
}

pub struct FriendshipServiceDependencies {
    pub accounts: Arc<dyn AccountRepository>,
    pub friendships: Arc<dyn FriendshipRepository>,
    pub distributor: TaskDistributor,
}

/// 好友请求用例：落库后通知另一方
pub struct FriendshipService {
    deps: FriendshipServiceDependencies,
}

impl FriendshipService {
    pub fn new(deps: FriendshipServiceDependencies) -> Self {
        Self { deps }
    }

    /// 发送好友请求，只能以自己的身份发送，接收者会收到通知
    pub async fn send_request(
        &self,
        requester: UserId,
        request: FriendRequest,
    ) -> Result<Friendship, ApplicationError> {
        if requester != request.sender_id {
            return Err(ApplicationError::Authorization);
        }
        if request.sender_id == request.receiver_id {
            return Err(DomainError::validation_error(
                "receiver_id",
                "cannot send a friend request to yourself",
            )
            .into());
        }

        self.deps
            .accounts
            .find_by_id(request.receiver_id)
            .await
            .map_err(|err| match err {
                RepositoryError::NotFound => ApplicationError::Domain(
                    DomainError::validation_error("receiver_id", "receiver does not exist"),
                ),
                other => ApplicationError::Repository(other),
            })?;

        let friendship = self
            .deps
            .friendships
            .create(request.sender_id, request.receiver_id)
            .await?;
        info!(
            friendship_id = %friendship.id,
            requester_id = %friendship.requester_id,
            addressee_id = %friendship.addressee_id,
            "好友请求已保存"
        );

        self.notify(
            friendship.requester_id,
            friendship.addressee_id,
            |username| format!("{username} has sent a friend request"),
        )
        .await;

        Ok(friendship)
    }

    /// 接收者接受或拒绝好友请求，发起者会收到通知
    pub async fn respond(
        &self,
        requester: UserId,
        id: FriendshipId,
        status: FriendshipStatus,
    ) -> Result<Friendship, ApplicationError> {
        if status == FriendshipStatus::Pending {
            return Err(
                DomainError::validation_error("status", "must be accepted or rejected").into(),
            );
        }

        let friendship = self
            .deps
            .friendships
            .find_by_id(id)
            .await
            .map_err(|err| match err {
                RepositoryError::NotFound => ApplicationError::Domain(
                    DomainError::validation_error("id", "no friend request with this id"),
                ),
                other => ApplicationError::Repository(other),
            })?;
        if requester != friendship.addressee_id {
            return Err(ApplicationError::Authorization);
        }

        let friendship = self.deps.friendships.update_status(id, status).await?;
        info!(friendship_id = %friendship.id, status = %status, "好友请求已处理");

        self.notify(
            friendship.addressee_id,
            friendship.requester_id,
            |username| format!("{username} has {status} your friend request"),
        )
        .await;

        Ok(friendship)
    }

    /// 通知内容需要发起方的用户名；查找或入队失败只记录日志
    async fn notify(
        &self,
        source_id: UserId,
        dest_id: UserId,
        content: impl FnOnce(&str) -> String,
    ) {
        let source = match self.deps.accounts.find_by_id(source_id).await {
            Ok(account) => account,
            Err(err) => {
                warn!(user_id = %source_id, error = %err, "无法读取通知发起方，跳过通知");
                return;
            }
        };

        let payload = NotificationPayload {
            source_id,
            dest_id,
            content: content(&source.username),
        };
        if let Err(err) = self
            .deps
            .distributor
            .distribute_send_notification(payload, EnqueueOptions::default())
            .await
        {
            error!(
                source_id = %source_id,
                dest_id = %dest_id,
                error = %err,
                "好友请求已保存，但通知任务入队失败"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryAccountRepository, MemoryFriendshipRepository, MemoryTaskBroker};
    use crate::tasks::{QueueSettings, TaskBroker, TaskKind, TaskPayload};
    use domain::Account;
    use std::time::Duration;

    struct Fixture {
        service: FriendshipService,
        broker: Arc<MemoryTaskBroker>,
        friendships: Arc<MemoryFriendshipRepository>,
    }

    fn fixture() -> Fixture {
        let broker = Arc::new(MemoryTaskBroker::default());
        let friendships = Arc::new(MemoryFriendshipRepository::new());
        let accounts = Arc::new(MemoryAccountRepository::with_accounts([
            Account::new(UserId::new(1), "alice", "alice@example.com"),
            Account::new(UserId::new(2), "bob", "bob@example.com"),
        ]));
        let service = FriendshipService::new(FriendshipServiceDependencies {
            accounts,
            friendships: friendships.clone(),
            distributor: TaskDistributor::new(broker.clone(), QueueSettings::defaults()),
        });
        Fixture {
            service,
            broker,
            friendships,
        }
    }

    fn alice_to_bob() -> FriendRequest {
        FriendRequest {
            sender_id: UserId::new(1),
            receiver_id: UserId::new(2),
        }
    }

    async fn next_notification(broker: &MemoryTaskBroker) -> NotificationPayload {
        let delivery = broker
            .dequeue(&["default".to_string()], Duration::ZERO)
            .await
            .unwrap()
            .expect("notification task");
        let kind: TaskKind = delivery.envelope.kind.parse().unwrap();
        match TaskPayload::decode(kind, &delivery.envelope.payload).unwrap() {
            TaskPayload::SendNotification(payload) => payload,
            other => panic!("unexpected task {other:?}"),
        }
    }

    #[tokio::test]
    async fn request_notifies_the_receiver() {
        let fixture = fixture();
        let friendship = fixture
            .service
            .send_request(UserId::new(1), alice_to_bob())
            .await
            .unwrap();

        assert_eq!(friendship.status, FriendshipStatus::Pending);
        assert_eq!(fixture.friendships.friendships().len(), 1);
        assert_eq!(
            next_notification(&fixture.broker).await,
            NotificationPayload {
                source_id: UserId::new(1),
                dest_id: UserId::new(2),
                content: "alice has sent a friend request".into(),
            }
        );
    }

    #[tokio::test]
    async fn request_validation() {
        let fixture = fixture();

        let err = fixture
            .service
            .send_request(UserId::new(2), alice_to_bob())
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Authorization));

        let to_self = FriendRequest {
            sender_id: UserId::new(1),
            receiver_id: UserId::new(1),
        };
        assert!(matches!(
            fixture.service.send_request(UserId::new(1), to_self).await,
            Err(ApplicationError::Domain(_))
        ));

        let to_stranger = FriendRequest {
            sender_id: UserId::new(1),
            receiver_id: UserId::new(42),
        };
        assert!(matches!(
            fixture.service.send_request(UserId::new(1), to_stranger).await,
            Err(ApplicationError::Domain(DomainError::ValidationError { ref field, .. })) if field == "receiver_id"
        ));

        assert!(fixture.friendships.friendships().is_empty());
        assert_eq!(fixture.broker.pending_count("default"), 0);
    }

    #[tokio::test]
    async fn response_notifies_the_requester() {
        let fixture = fixture();
        let request = fixture
            .service
            .send_request(UserId::new(1), alice_to_bob())
            .await
            .unwrap();
        next_notification(&fixture.broker).await;

        let updated = fixture
            .service
            .respond(UserId::new(2), request.id, FriendshipStatus::Accepted)
            .await
            .unwrap();

        assert_eq!(updated.status, FriendshipStatus::Accepted);
        assert_eq!(
            next_notification(&fixture.broker).await,
            NotificationPayload {
                source_id: UserId::new(2),
                dest_id: UserId::new(1),
                content: "bob has accepted your friend request".into(),
            }
        );
    }

    #[tokio::test]
    async fn only_the_addressee_may_respond() {
        let fixture = fixture();
        let request = fixture
            .service
            .send_request(UserId::new(1), alice_to_bob())
            .await
            .unwrap();

        let err = fixture
            .service
            .respond(UserId::new(1), request.id, FriendshipStatus::Rejected)
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Authorization));

        assert!(fixture
            .service
            .respond(UserId::new(2), request.id, FriendshipStatus::Pending)
            .await
            .is_err());
        assert!(fixture
            .service
            .respond(UserId::new(2), FriendshipId::new(99), FriendshipStatus::Accepted)
            .await
            .is_err());
        assert_eq!(
            fixture.friendships.friendships()[0].status,
            FriendshipStatus::Pending
        );
    }

    #[tokio::test]
    async fn enqueue_failure_does_not_fail_the_request() {
        let fixture = fixture();
        fixture.broker.set_unavailable(true);

        let request = fixture
            .service
            .send_request(UserId::new(1), alice_to_bob())
            .await
            .unwrap();
        let updated = fixture
            .service
            .respond(UserId::new(2), request.id, FriendshipStatus::Rejected)
            .await;

        assert!(updated.is_ok());
        assert_eq!(
            fixture.friendships.friendships()[0].status,
            FriendshipStatus::Rejected
        );
    }
}
