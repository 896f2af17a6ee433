use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Account, AccountRepository, ChatMessage, ChatType, Friendship, FriendshipId,
    FriendshipRepository, FriendshipStatus, MessageId, MessageRepository, NewAccount, NewMessage,
    NewNotification, NotificationId, NotificationRecord, NotificationRepository,
    NotificationStatus, RepositoryError, UserId,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::duplicate(unique_field(db.constraint()))
        }
        other => RepositoryError::storage(other.to_string()),
    }
}

/// 由 Postgres 默认的 `<表>_<列>_key` 约束名取出列名
fn unique_field(constraint: Option<&str>) -> String {
    constraint
        .and_then(|name| name.strip_suffix("_key"))
        .and_then(|name| name.split_once('_'))
        .map(|(_, column)| column.to_owned())
        .unwrap_or_else(|| "value".to_owned())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

#[derive(Debug, FromRow)]
struct AccountRecord {
    id: i64,
    username: String,
    email: String,
}

impl From<AccountRecord> for Account {
    fn from(value: AccountRecord) -> Self {
        Account::new(UserId::from(value.id), value.username, value.email)
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: i64,
    sender_id: i64,
    receiver_id: Option<i64>,
    chat_type: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRecord> for ChatMessage {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let chat_type =
            ChatType::parse(&value.chat_type).map_err(|err| invalid_data(err.to_string()))?;
        Ok(ChatMessage {
            id: MessageId::from(value.id),
            sender_id: UserId::from(value.sender_id),
            receiver_id: value.receiver_id.map(UserId::from),
            chat_type,
            content: value.content,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct NotificationRow {
    id: i64,
    source_id: i64,
    dest_id: i64,
    content: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for NotificationRecord {
    type Error = RepositoryError;

    fn try_from(value: NotificationRow) -> Result<Self, Self::Error> {
        let status =
            NotificationStatus::parse(&value.status).map_err(|err| invalid_data(err.to_string()))?;
        Ok(NotificationRecord {
            id: NotificationId::from(value.id),
            source_id: UserId::from(value.source_id),
            dest_id: UserId::from(value.dest_id),
            content: value.content,
            status,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct FriendshipRow {
    id: i64,
    requester_id: i64,
    addressee_id: i64,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<FriendshipRow> for Friendship {
    type Error = RepositoryError;

    fn try_from(value: FriendshipRow) -> Result<Self, Self::Error> {
        let status =
            FriendshipStatus::parse(&value.status).map_err(|err| invalid_data(err.to_string()))?;
        Ok(Friendship {
            id: FriendshipId::from(value.id),
            requester_id: UserId::from(value.requester_id),
            addressee_id: UserId::from(value.addressee_id),
            status,
            created_at: value.created_at,
        })
    }
}

#[derive(Clone)]
pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    async fn create(&self, account: NewAccount) -> Result<Account, RepositoryError> {
        let record = sqlx::query_as::<_, AccountRecord>(
            r#"
            INSERT INTO accounts (username, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, username, email
            "#,
        )
        .bind(&account.username)
        .bind(&account.email)
        .bind(&account.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(Account::from(record))
    }

    async fn find_by_id(&self, id: UserId) -> Result<Account, RepositoryError> {
        let record = sqlx::query_as::<_, AccountRecord>(
            r#"
            SELECT id, username, email
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Account::from).ok_or(RepositoryError::NotFound)
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn create(&self, message: NewMessage) -> Result<ChatMessage, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            INSERT INTO messages (sender_id, receiver_id, chat_type, content)
            VALUES ($1, $2, $3, $4)
            RETURNING id, sender_id, receiver_id, chat_type, content, created_at
            "#,
        )
        .bind(message.sender_id.as_i64())
        .bind(message.receiver_id.map(UserId::as_i64))
        .bind(message.chat_type().as_str())
        .bind(&message.content)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        ChatMessage::try_from(record)
    }
}

#[derive(Clone)]
pub struct PgFriendshipRepository {
    pool: PgPool,
}

impl PgFriendshipRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FriendshipRepository for PgFriendshipRepository {
    async fn create(
        &self,
        requester_id: UserId,
        addressee_id: UserId,
    ) -> Result<Friendship, RepositoryError> {
        let row = sqlx::query_as::<_, FriendshipRow>(
            r#"
            INSERT INTO friendships (requester_id, addressee_id, status)
            VALUES ($1, $2, $3)
            RETURNING id, requester_id, addressee_id, status, created_at
            "#,
        )
        .bind(requester_id.as_i64())
        .bind(addressee_id.as_i64())
        .bind(FriendshipStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Friendship::try_from(row)
    }

    async fn find_by_id(&self, id: FriendshipId) -> Result<Friendship, RepositoryError> {
        let row = sqlx::query_as::<_, FriendshipRow>(
            r#"
            SELECT id, requester_id, addressee_id, status, created_at
            FROM friendships
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        row.ok_or(RepositoryError::NotFound)
            .and_then(Friendship::try_from)
    }

    async fn update_status(
        &self,
        id: FriendshipId,
        status: FriendshipStatus,
    ) -> Result<Friendship, RepositoryError> {
        let row = sqlx::query_as::<_, FriendshipRow>(
            r#"
            UPDATE friendships
            SET status = $2
            WHERE id = $1
            RETURNING id, requester_id, addressee_id, status, created_at
            "#,
        )
        .bind(id.as_i64())
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        row.ok_or(RepositoryError::NotFound)
            .and_then(Friendship::try_from)
    }
}

#[derive(Clone)]
pub struct PgNotificationRepository {
    pool: PgPool,
}

impl PgNotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepository for PgNotificationRepository {
    async fn create_once(
        &self,
        dedup_key: &str,
        notification: NewNotification,
    ) -> Result<NotificationRecord, RepositoryError> {
        let inserted = sqlx::query_as::<_, NotificationRow>(
            r#"
            INSERT INTO notifications (dedup_key, source_id, dest_id, content, status)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (dedup_key) DO NOTHING
            RETURNING id, source_id, dest_id, content, status, created_at
            "#,
        )
        .bind(dedup_key)
        .bind(notification.source_id.as_i64())
        .bind(notification.dest_id.as_i64())
        .bind(&notification.content)
        .bind(NotificationStatus::Unread.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        // 冲突说明任务被重放过，返回第一次写入的记录
        let row = match inserted {
            Some(row) => row,
            None => sqlx::query_as::<_, NotificationRow>(
                r#"
                SELECT id, source_id, dest_id, content, status, created_at
                FROM notifications
                WHERE dedup_key = $1
                "#,
            )
            .bind(dedup_key)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?,
        };

        NotificationRecord::try_from(row)
    }
}

#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub account_repository: Arc<PgAccountRepository>,
    pub friendship_repository: Arc<PgFriendshipRepository>,
    pub message_repository: Arc<PgMessageRepository>,
    pub notification_repository: Arc<PgNotificationRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            account_repository: Arc::new(PgAccountRepository::new(pool.clone())),
            friendship_repository: Arc::new(PgFriendshipRepository::new(pool.clone())),
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            notification_repository: Arc::new(PgNotificationRepository::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
