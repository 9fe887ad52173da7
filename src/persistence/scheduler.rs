//! Persistence scheduling.
//!
//! [`FlushScheduler`] is the per-room bookkeeping for the trailing-edge
//! debounce: it never sleeps or spawns, the room actor drives it from its
//! `select!` loop. [`flush_with_retry`] is the write itself, run in a
//! spawned task so the room keeps applying edits while it is in flight.
//!
//! Versions are monotonically increasing mutation counters. A room is dirty
//! while `version > persisted`.

use collab_proto::DocumentId;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{DocumentStore, StoreError};
use crate::config::PersistenceConfig;

/// Debounce and write-state of one room.
#[derive(Debug)]
pub struct FlushScheduler {
    debounce: Duration,
    version: u64,
    persisted: u64,
    deadline: Option<Instant>,
    in_flight: Option<u64>,
    abandoned: Option<u64>,
    degraded: bool,
}

impl FlushScheduler {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            version: 0,
            persisted: 0,
            deadline: None,
            in_flight: None,
            abandoned: None,
            degraded: false,
        }
    }

    /// Record an applied update and push the deadline out.
    pub fn on_mutation(&mut self, now: Instant) {
        self.version += 1;
        self.deadline = Some(now + self.debounce);
    }

    /// Skip the remaining debounce (room emptied or shutting down).
    pub fn expedite(&mut self, now: Instant) {
        if self.is_dirty() && self.abandoned != Some(self.version) {
            self.deadline = Some(now);
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.version > self.persisted
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn persisted_version(&self) -> u64 {
        self.persisted
    }

    /// Armed deadline, only while no write is outstanding.
    pub fn deadline(&self) -> Option<Instant> {
        if self.in_flight.is_some() {
            None
        } else {
            self.deadline
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Start a write covering everything up to the current version.
    pub fn begin(&mut self) -> u64 {
        self.deadline = None;
        self.in_flight = Some(self.version);
        self.version
    }

    /// Write of `version` succeeded.
    ///
    /// Mutations that landed while it was in flight already re-armed the
    /// deadline, so the room stays dirty and flushes again later.
    pub fn complete(&mut self, version: u64) {
        self.in_flight = None;
        self.persisted = self.persisted.max(version);
        self.abandoned = None;
        self.degraded = false;
    }

    /// Write of `version` gave up after exhausting retries.
    pub fn abandon(&mut self, version: u64) {
        self.in_flight = None;
        self.abandoned = Some(version);
        self.degraded = true;
    }

    /// Nothing pending: clean, or the latest state already failed for good.
    pub fn is_settled(&self) -> bool {
        self.in_flight.is_none()
            && (!self.is_dirty() || self.abandoned == Some(self.version))
            && (self.deadline.is_none() || self.abandoned == Some(self.version))
    }
}

/// Exponential backoff for failed writes.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1` (attempts count from 1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl From<&PersistenceConfig> for RetryPolicy {
    fn from(config: &PersistenceConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.backoff_initial_ms),
            max_backoff: Duration::from_millis(config.backoff_max_ms),
        }
    }
}

/// Save `snapshot`, retrying retryable failures with backoff.
///
/// Returns the last error once attempts are exhausted or a non-retryable
/// error occurs.
pub async fn flush_with_retry(
    store: Arc<dyn DocumentStore>,
    id: DocumentId,
    snapshot: Vec<u8>,
    policy: RetryPolicy,
) -> Result<(), StoreError> {
    let mut attempt = 1;
    loop {
        match store.save(&id, &snapshot).await {
            Ok(()) => {
                debug!(doc = %id, bytes = snapshot.len(), attempt, "Snapshot persisted");
                return Ok(());
            }
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    doc = %id,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "Snapshot write failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
