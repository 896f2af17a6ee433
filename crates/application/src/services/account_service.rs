use std::sync::Arc;

use domain::{Account, AccountRepository, DomainError, NewAccount, RepositoryError};
use tracing::{error, info};

use crate::error::ApplicationError;
use crate::password::PasswordHasher;
use crate::tasks::{EmailPayload, EnqueueOptions, TaskDistributor};

#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

pub struct AccountServiceDependencies {
    pub accounts: Arc<dyn AccountRepository>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub distributor: TaskDistributor,
}

/// 账户注册用例：创建账户后入队欢迎邮件
pub struct AccountService {
    deps: AccountServiceDependencies,
}

impl AccountService {
    pub fn new(deps: AccountServiceDependencies) -> Self {
        Self { deps }
    }

    /// 用户名或邮箱被占用时返回对应字段的校验错误。
    /// 欢迎邮件入队失败只记录日志。
    pub async fn register(&self, request: RegisterRequest) -> Result<Account, ApplicationError> {
        if request.password.is_empty() {
            return Err(DomainError::validation_error("password", "cannot be empty").into());
        }

        let password_hash = self.deps.password_hasher.hash(&request.password).await?;
        let new_account = NewAccount::new(request.username, request.email, password_hash)?;
        let account = self
            .deps
            .accounts
            .create(new_account)
            .await
            .map_err(|err| match err {
                RepositoryError::Duplicate { field } => ApplicationError::Domain(
                    DomainError::validation_error(field, "already taken"),
                ),
                other => ApplicationError::Repository(other),
            })?;
        info!(user_id = %account.id, username = %account.username, "账户已注册");

        let payload = EmailPayload {
            email: account.email.clone(),
            username: account.username.clone(),
        };
        if let Err(err) = self
            .deps
            .distributor
            .distribute_send_email(payload, EnqueueOptions::default())
            .await
        {
            error!(user_id = %account.id, error = %err, "账户已注册，但欢迎邮件任务入队失败");
        }

        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryAccountRepository, MemoryPasswordHasher, MemoryTaskBroker};
    use crate::tasks::{QueueSettings, TaskBroker, TaskKind, TaskPayload};
    use domain::UserId;
    use std::time::Duration;

    struct Fixture {
        service: AccountService,
        broker: Arc<MemoryTaskBroker>,
        accounts: Arc<MemoryAccountRepository>,
    }

    fn fixture() -> Fixture {
        let broker = Arc::new(MemoryTaskBroker::default());
        let accounts = Arc::new(MemoryAccountRepository::with_accounts([Account::new(
            UserId::new(1),
            "alice",
            "alice@example.com",
        )]));
        let service = AccountService::new(AccountServiceDependencies {
            accounts: accounts.clone(),
            password_hasher: Arc::new(MemoryPasswordHasher),
            distributor: TaskDistributor::new(broker.clone(), QueueSettings::defaults()),
        });
        Fixture {
            service,
            broker,
            accounts,
        }
    }

    fn request(username: &str, email: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.into(),
            email: email.into(),
            password: "secret".into(),
        }
    }

    #[tokio::test]
    async fn registration_enqueues_welcome_email() {
        let fixture = fixture();
        let account = fixture
            .service
            .register(request("bob", "bob@example.com"))
            .await
            .unwrap();

        assert_eq!(
            fixture.accounts.find_by_id(account.id).await.unwrap(),
            account
        );
        assert_eq!(fixture.broker.pending_count("default"), 1);

        let delivery = fixture
            .broker
            .dequeue(&["default".to_string()], Duration::ZERO)
            .await
            .unwrap()
            .expect("welcome email task");
        let kind: TaskKind = delivery.envelope.kind.parse().unwrap();
        assert_eq!(kind, TaskKind::SendEmail);
        assert_eq!(
            TaskPayload::decode(kind, &delivery.envelope.payload).unwrap(),
            TaskPayload::SendEmail(EmailPayload {
                email: "bob@example.com".into(),
                username: "bob".into(),
            })
        );
    }

    #[tokio::test]
    async fn taken_email_is_a_validation_error_and_sends_nothing() {
        let fixture = fixture();
        let err = fixture
            .service
            .register(request("alice2", "alice@example.com"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::ValidationError { ref field, .. }) if field == "email"
        ));
        assert_eq!(fixture.broker.pending_count("default"), 0);
    }

    #[tokio::test]
    async fn empty_password_is_rejected() {
        let fixture = fixture();
        let mut req = request("bob", "bob@example.com");
        req.password.clear();

        assert!(fixture.service.register(req).await.is_err());
        assert_eq!(fixture.broker.pending_count("default"), 0);
    }

    #[tokio::test]
    async fn enqueue_failure_does_not_fail_registration() {
        let fixture = fixture();
        fixture.broker.set_unavailable(true);

        let account = fixture
            .service
            .register(request("bob", "bob@example.com"))
            .await;

        assert!(account.is_ok());
        assert_eq!(fixture.broker.pending_count("default"), 0);
    }
}
