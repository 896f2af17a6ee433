use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use domain::{
    Account, AccountRepository, ChatMessage, Friendship, FriendshipId, FriendshipRepository,
    FriendshipStatus, MessageId, MessageRepository, NewAccount, NewMessage, NewNotification,
    NotificationId, NotificationRecord, NotificationRepository, RepositoryError, UserId,
};

/// 消耗一次注入的故障
fn take_failure(remaining: &AtomicUsize) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// 内存中的账户表
#[derive(Default)]
pub struct MemoryAccountRepository {
    accounts: RwLock<HashMap<UserId, Account>>,
}

impl MemoryAccountRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let repository = Self::new();
        for account in accounts {
            repository.insert(account);
        }
        repository
    }

    pub fn insert(&self, account: Account) {
        self.accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(account.id, account);
    }
}

#[async_trait]
impl AccountRepository for MemoryAccountRepository {
    async fn create(&self, account: NewAccount) -> Result<Account, RepositoryError> {
        let mut accounts = self.accounts.write().unwrap_or_else(PoisonError::into_inner);
        if accounts.values().any(|existing| existing.email == account.email) {
            return Err(RepositoryError::duplicate("email"));
        }
        if accounts
            .values()
            .any(|existing| existing.username == account.username)
        {
            return Err(RepositoryError::duplicate("username"));
        }

        let next = accounts.keys().map(|id| id.as_i64()).max().unwrap_or(0) + 1;
        let account = account.into_account(UserId::new(next));
        accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Account, RepositoryError> {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }
}

/// 内存中的消息表
pub struct MemoryMessageRepository {
    messages: Mutex<Vec<ChatMessage>>,
    next_id: AtomicI64,
}

impl MemoryMessageRepository {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for MemoryMessageRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageRepository for MemoryMessageRepository {
    async fn create(&self, message: NewMessage) -> Result<ChatMessage, RepositoryError> {
        let id = MessageId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let message = message.into_message(id, Utc::now());
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(message)
    }
}

/// 内存中的好友请求表
pub struct MemoryFriendshipRepository {
    friendships: Mutex<Vec<Friendship>>,
    next_id: AtomicI64,
}

impl MemoryFriendshipRepository {
    pub fn new() -> Self {
        Self {
            friendships: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn friendships(&self) -> Vec<Friendship> {
        self.friendships
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for MemoryFriendshipRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FriendshipRepository for MemoryFriendshipRepository {
    async fn create(
        &self,
        requester_id: UserId,
        addressee_id: UserId,
    ) -> Result<Friendship, RepositoryError> {
        let friendship = Friendship {
            id: FriendshipId::new(self.next_id.fetch_add(1, Ordering::SeqCst)),
            requester_id,
            addressee_id,
            status: FriendshipStatus::Pending,
            created_at: Utc::now(),
        };
        self.friendships
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(friendship.clone());
        Ok(friendship)
    }

    async fn find_by_id(&self, id: FriendshipId) -> Result<Friendship, RepositoryError> {
        self.friendships
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|friendship| friendship.id == id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn update_status(
        &self,
        id: FriendshipId,
        status: FriendshipStatus,
    ) -> Result<Friendship, RepositoryError> {
        let mut friendships = self.friendships.lock().unwrap_or_else(PoisonError::into_inner);
        let friendship = friendships
            .iter_mut()
            .find(|friendship| friendship.id == id)
            .ok_or(RepositoryError::NotFound)?;
        friendship.status = status;
        Ok(friendship.clone())
    }
}

#[derive(Default)]
struct NotificationState {
    records: Vec<NotificationRecord>,
    by_key: HashMap<String, NotificationId>,
}

/// 内存中的通知表，按去重键保证幂等，可注入存储故障
pub struct MemoryNotificationRepository {
    state: Mutex<NotificationState>,
    next_id: AtomicI64,
    failures: AtomicUsize,
}

impl MemoryNotificationRepository {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NotificationState::default()),
            next_id: AtomicI64::new(1),
            failures: AtomicUsize::new(0),
        }
    }

    /// 接下来的 `count` 次写入返回存储错误
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<NotificationRecord> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .clone()
    }

    pub fn records_for(&self, user_id: UserId) -> Vec<NotificationRecord> {
        self.records()
            .into_iter()
            .filter(|record| record.is_for(user_id))
            .collect()
    }
}

impl Default for MemoryNotificationRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationRepository for MemoryNotificationRepository {
    async fn create_once(
        &self,
        dedup_key: &str,
        notification: NewNotification,
    ) -> Result<NotificationRecord, RepositoryError> {
        if take_failure(&self.failures) {
            return Err(RepositoryError::storage("injected notification store failure"));
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = state.by_key.get(dedup_key).copied() {
            if let Some(record) = state.records.iter().find(|record| record.id == existing) {
                return Ok(record.clone());
            }
        }

        let id = NotificationId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let record = notification.into_record(id, Utc::now());
        state.by_key.insert(dedup_key.to_owned(), id);
        state.records.push(record.clone());
        Ok(record)
    }
}
