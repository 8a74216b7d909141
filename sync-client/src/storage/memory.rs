//! In-memory storage backend, with failure injection for tests.

use super::{StorageError, UserFilter, UserStore};
use async_trait::async_trait;
use nostr_sync_core::User;
use nostr_sync_types::PublicKey;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::sync::RwLock;

/// In-memory User store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<BTreeMap<PublicKey, User>>,
    failures: AtomicU32,
    writes: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` operations fail with [`StorageError::Unavailable`].
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Number of successful write operations so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of stored users.
    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    /// Whether no user is stored.
    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }

    fn check(&self) -> Result<(), StorageError> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StorageError::Unavailable("injected failure".into()));
        }
        Ok(())
    }

    fn wrote(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_user(&self, id: &PublicKey) -> Result<Option<User>, StorageError> {
        self.check()?;
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn upsert_user(&self, user: &User) -> Result<(), StorageError> {
        self.check()?;
        self.users.write().await.insert(user.id, user.clone());
        self.wrote();
        Ok(())
    }

    async fn upsert_users(&self, users: &[User]) -> Result<(), StorageError> {
        self.check()?;
        let mut map = self.users.write().await;
        for user in users {
            map.insert(user.id, user.clone());
        }
        self.wrote();
        Ok(())
    }

    async fn list_users(&self, filter: UserFilter) -> Result<Vec<User>, StorageError> {
        self.check()?;
        Ok(self
            .users
            .read()
            .await
            .values()
            .filter(|u| filter.admits(u))
            .cloned()
            .collect())
    }

    async fn set_contact(&self, id: &PublicKey, contact: bool) -> Result<(), StorageError> {
        self.check()?;
        self.users
            .write()
            .await
            .entry(*id)
            .or_insert_with(|| User::new(*id))
            .contact = contact;
        self.wrote();
        Ok(())
    }

    async fn wipe_all(&self) -> Result<(), StorageError> {
        self.check()?;
        self.users.write().await.clear();
        self.wrote();
        Ok(())
    }
}
