//! SQLite storage backend for the User projection.

use super::{StorageError, UserFilter, UserStore};
use async_trait::async_trait;
use nostr_sync_core::User;
use nostr_sync_types::PublicKey;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;

/// SQLite-based User storage.
///
/// Uses WAL mode for concurrent reads/writes.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

const UPSERT_SQL: &str = r#"
    INSERT INTO users (id, name, about, picture, lud06, contact, follower,
                       last_metadata_at, last_contact_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
    ON CONFLICT(id) DO UPDATE SET
        name = ?2, about = ?3, picture = ?4, lud06 = ?5,
        contact = ?6, follower = ?7,
        last_metadata_at = ?8, last_contact_at = ?9
"#;

impl SqliteStore {
    /// Open (or create) a database file.
    pub async fn new(path: &Path) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // One connection that never recycles, or the database vanishes
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT,
                about TEXT,
                picture TEXT,
                lud06 TEXT,
                contact INTEGER NOT NULL DEFAULT 0,
                follower INTEGER NOT NULL DEFAULT 0,
                last_metadata_at INTEGER,
                last_contact_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_contact ON users(contact)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_follower ON users(follower)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn upsert_in(tx: &mut Transaction<'_, Sqlite>, user: &User) -> Result<(), StorageError> {
        sqlx::query(UPSERT_SQL)
            .bind(user.id.to_hex())
            .bind(&user.name)
            .bind(&user.about)
            .bind(&user.picture)
            .bind(&user.lud06)
            .bind(user.contact)
            .bind(user.follower)
            .bind(user.last_metadata_at.map(|t| t as i64))
            .bind(user.last_contact_at.map(|t| t as i64))
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn get_user(&self, id: &PublicKey) -> Result<Option<User>, StorageError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, name, about, picture, lud06, contact, follower,
                   last_metadata_at, last_contact_at
            FROM users
            WHERE id = ?1
            "#,
        )
        .bind(id.to_hex())
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::try_from).transpose()
    }

    async fn upsert_user(&self, user: &User) -> Result<(), StorageError> {
        self.upsert_users(std::slice::from_ref(user)).await
    }

    async fn upsert_users(&self, users: &[User]) -> Result<(), StorageError> {
        if users.is_empty() {
            return Ok(());
        }

        // Use a transaction so a list's rows land together
        let mut tx = self.pool.begin().await?;
        for user in users {
            Self::upsert_in(&mut tx, user).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_users(&self, filter: UserFilter) -> Result<Vec<User>, StorageError> {
        let sql = match filter {
            UserFilter::All => "SELECT * FROM users ORDER BY id",
            UserFilter::Contacts => "SELECT * FROM users WHERE contact = 1 ORDER BY id",
            UserFilter::Followers => "SELECT * FROM users WHERE follower = 1 ORDER BY id",
        };
        let rows = sqlx::query_as::<_, UserRow>(sql)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(User::try_from).collect()
    }

    async fn set_contact(&self, id: &PublicKey, contact: bool) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, contact) VALUES (?1, ?2)
            ON CONFLICT(id) DO UPDATE SET contact = ?2
            "#,
        )
        .bind(id.to_hex())
        .bind(contact)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn wipe_all(&self) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM users").execute(&self.pool).await?;
        Ok(())
    }
}

/// Internal row type for SQLite queries.
#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    name: Option<String>,
    about: Option<String>,
    picture: Option<String>,
    lud06: Option<String>,
    contact: bool,
    follower: bool,
    last_metadata_at: Option<i64>,
    last_contact_at: Option<i64>,
}

impl TryFrom<UserRow> for User {
    type Error = StorageError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let id = PublicKey::from_hex(&row.id).map_err(|e| StorageError::Corrupt {
            id: row.id.clone(),
            reason: e.to_string(),
        })?;
        Ok(User {
            id,
            name: row.name,
            about: row.about,
            picture: row.picture,
            lud06: row.lud06,
            contact: row.contact,
            follower: row.follower,
            last_metadata_at: row.last_metadata_at.map(|t| t as u64),
            last_contact_at: row.last_contact_at.map(|t| t as u64),
        })
    }
}
