//! Storage layer for the local User projection.
//!
//! The reconciler reads and writes User rows through [`UserStore`]; the
//! facade uses it for listings and local contact edits.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use nostr_sync_core::User;
use nostr_sync_types::PublicKey;

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The store cannot serve requests right now.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be decoded.
    #[error("corrupt row {id}: {reason}")]
    Corrupt {
        /// Row key as stored.
        id: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// Which users a listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserFilter {
    /// Every known user.
    #[default]
    All,
    /// Users I follow.
    Contacts,
    /// Users following me.
    Followers,
}

impl UserFilter {
    /// Whether `user` belongs in this listing.
    pub fn admits(&self, user: &User) -> bool {
        match self {
            UserFilter::All => true,
            UserFilter::Contacts => user.contact,
            UserFilter::Followers => user.follower,
        }
    }
}

/// Trait for User storage backends.
#[async_trait]
pub trait UserStore: Send + Sync + 'static {
    /// Get one user.
    async fn get_user(&self, id: &PublicKey) -> Result<Option<User>, StorageError>;

    /// Insert or replace one user.
    async fn upsert_user(&self, user: &User) -> Result<(), StorageError>;

    /// Insert or replace several users.
    ///
    /// Backends with transactions write all rows or none.
    async fn upsert_users(&self, users: &[User]) -> Result<(), StorageError> {
        for user in users {
            self.upsert_user(user).await?;
        }
        Ok(())
    }

    /// List users, ordered by id.
    async fn list_users(&self, filter: UserFilter) -> Result<Vec<User>, StorageError>;

    /// Set the contact flag directly, creating the row if needed.
    ///
    /// Used for local edits; no timestamp is checked.
    async fn set_contact(&self, id: &PublicKey, contact: bool) -> Result<(), StorageError>;

    /// Delete every row.
    async fn wipe_all(&self) -> Result<(), StorageError>;
}
