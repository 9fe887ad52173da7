//! Durable document storage.
//!
//! The [`DocumentStore`] trait is the only seam between rooms and the
//! database. A single store is built at startup and injected everywhere
//! as `Arc<dyn DocumentStore>`.
//!
//! - [`SqliteStore`]: production backend (sqlx, embedded migrations)
//! - [`MemoryStore`]: development and tests, with failure injection
//! - [`scheduler`]: debounce bookkeeping and the retrying flush

use async_trait::async_trait;
use collab_proto::DocumentId;
use std::sync::Arc;
use thiserror::Error;

pub mod memory;
pub mod scheduler;
pub mod sqlite;

pub use memory::MemoryStore;
pub use scheduler::{FlushScheduler, RetryPolicy, flush_with_retry};
pub use sqlite::SqliteStore;

use crate::config::{PersistenceBackend, PersistenceConfig};

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(DocumentId),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotFound(_) | Self::Migration(_) => false,
            Self::Unavailable(_) => true,
            Self::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Database(_)
            ),
        }
    }

    /// Short label for metrics.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Unavailable(_) => "unavailable",
            Self::Database(_) => "database",
            Self::Migration(_) => "migration",
        }
    }
}

/// Persistence collaborator for CRDT snapshots.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Load the stored snapshot.
    ///
    /// `Err(NotFound)` if the document does not exist, `Ok(None)` if it
    /// exists but has never been edited.
    async fn load(&self, id: &DocumentId) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replace the stored snapshot.
    async fn save(&self, id: &DocumentId, snapshot: &[u8]) -> Result<(), StoreError>;

    /// Create an empty document record. Idempotent.
    async fn create(&self, id: &DocumentId) -> Result<(), StoreError>;
}

/// Build the configured backend.
pub async fn open(config: &PersistenceConfig) -> Result<Arc<dyn DocumentStore>, StoreError> {
    match config.backend {
        PersistenceBackend::Sqlite => Ok(Arc::new(SqliteStore::open(&config.path).await?)),
        PersistenceBackend::Memory => {
            tracing::warn!("Using in-memory document store; edits are lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
