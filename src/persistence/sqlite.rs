//! SQLite document store.

use async_trait::async_trait;
use chrono::Utc;
use collab_proto::DocumentId;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

use super::{DocumentStore, StoreError};

static MEMDB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// `documents` table backed store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connection acquire timeout - prevents connection storms from blocking indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum time a connection can remain idle before being closed.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Open (or create) the database and apply migrations.
    ///
    /// `":memory:"` yields a private in-memory database.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let pool = if path == ":memory:" {
            // Unique name per call; parallel tests must not share one database.
            let id = MEMDB_COUNTER.fetch_add(1, Ordering::Relaxed);
            let memdb_uri = format!(
                "file:collabd-memdb-{}-{}?mode=memory&cache=shared",
                std::process::id(),
                id
            );

            let options = SqliteConnectOptions::new()
                .filename(&memdb_uri)
                .shared_cache(true)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(1)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .connect_with(options)
                .await?
        } else {
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && let Err(e) = std::fs::create_dir_all(parent)
            {
                tracing::warn!(path = %parent.display(), error = %e, "Failed to create database directory");
            }

            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        };

        info!(path = %path, "Document store connected");

        sqlx::migrate!("./migrations").run(&pool).await?;

        // WAL lets snapshot reads proceed while a flush is writing.
        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    /// Underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn load(&self, id: &DocumentId) -> Result<Option<Vec<u8>>, StoreError> {
        let row: Option<(Option<Vec<u8>>,)> =
            sqlx::query_as("SELECT yjs_state FROM documents WHERE id = ?")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((state,)) => Ok(state),
            None => Err(StoreError::NotFound(id.clone())),
        }
    }

    async fn save(&self, id: &DocumentId, snapshot: &[u8]) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, yjs_state, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                yjs_state = excluded.yjs_state,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(id.as_str())
        .bind(snapshot)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create(&self, id: &DocumentId) -> Result<(), StoreError> {
        sqlx::query("INSERT OR IGNORE INTO documents (id, yjs_state, updated_at) VALUES (?, NULL, ?)")
            .bind(id.as_str())
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
