//! In-memory document store.

use async_trait::async_trait;
use collab_proto::DocumentId;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::{DocumentStore, StoreError};

/// DashMap-backed store for development and tests.
///
/// Counts loads and saves, and can be told to fail or stall so retry and
/// shutdown paths can be exercised without a real database.
#[derive(Default)]
pub struct MemoryStore {
    docs: DashMap<DocumentId, Option<Vec<u8>>>,
    loads: AtomicUsize,
    saves: AtomicUsize,
    save_attempts: AtomicUsize,
    failing_saves: AtomicUsize,
    unavailable: AtomicBool,
    load_delay: Mutex<Option<Duration>>,
    save_delay: Mutex<Option<Duration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document with no CRDT state.
    pub fn insert(&self, id: impl Into<DocumentId>) {
        self.docs.entry(id.into()).or_insert(None);
    }

    /// Register a document with a stored snapshot.
    pub fn insert_with(&self, id: impl Into<DocumentId>, snapshot: Vec<u8>) {
        self.docs.insert(id.into(), Some(snapshot));
    }

    /// Current stored snapshot, if any.
    pub fn snapshot(&self, id: &DocumentId) -> Option<Vec<u8>> {
        self.docs.get(id).and_then(|e| e.value().clone())
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Every call to `save`, failed or not.
    pub fn save_attempts(&self) -> usize {
        self.save_attempts.load(Ordering::SeqCst)
    }

    /// Fail the next `n` saves with a retryable error.
    pub fn fail_next_saves(&self, n: usize) {
        self.failing_saves.store(n, Ordering::SeqCst);
    }

    /// Make every load and save fail until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_load_delay(&self, delay: Option<Duration>) {
        *self.load_delay.lock() = delay;
    }

    pub fn set_save_delay(&self, delay: Option<Duration>) {
        *self.save_delay.lock() = delay;
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store marked unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn load(&self, id: &DocumentId) -> Result<Option<Vec<u8>>, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let delay = *self.load_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_available()?;
        self.docs
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn save(&self, id: &DocumentId, snapshot: &[u8]) -> Result<(), StoreError> {
        self.save_attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.save_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_available()?;
        let injected = self
            .failing_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected save failure".into()));
        }
        self.docs.insert(id.clone(), Some(snapshot.to_vec()));
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create(&self, id: &DocumentId) -> Result<(), StoreError> {
        self.check_available()?;
        self.docs.entry(id.clone()).or_insert(None);
        Ok(())
    }
}
