//! Shared replicated document state.
//!
//! A thin wrapper over a `yrs::Doc` (the Rust port of Yjs), so browser
//! editors using Yjs can exchange updates with the server byte-for-byte.
//! Merge is commutative, associative and idempotent; the server never
//! interprets document contents.

use thiserror::Error;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

/// Errors from decoding or applying CRDT payloads.
#[derive(Debug, Error)]
pub enum ReplicaError {
    #[error("malformed update: {0}")]
    MalformedUpdate(String),
    #[error("malformed state vector: {0}")]
    MalformedStateVector(String),
}

/// One converged copy of a document.
pub struct Replica {
    doc: Doc,
}

impl Replica {
    /// An empty document.
    pub fn new() -> Self {
        Self { doc: Doc::new() }
    }

    /// Rebuild from a stored snapshot (as produced by [`Replica::snapshot`]).
    pub fn restore(snapshot: &[u8]) -> Result<Self, ReplicaError> {
        let replica = Self::new();
        if !snapshot.is_empty() {
            replica.apply(snapshot)?;
        }
        Ok(replica)
    }

    /// Merge an incremental update. Applying the same bytes twice is a no-op.
    pub fn apply(&self, update: &[u8]) -> Result<(), ReplicaError> {
        let update =
            Update::decode_v1(update).map_err(|e| ReplicaError::MalformedUpdate(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| ReplicaError::MalformedUpdate(e.to_string()))
    }

    /// Encoded state vector (what this replica has seen, per client).
    pub fn state_vector(&self) -> Vec<u8> {
        self.doc.transact().state_vector().encode_v1()
    }

    /// Everything this replica has that a peer with `remote_sv` lacks.
    pub fn diff(&self, remote_sv: &[u8]) -> Result<Vec<u8>, ReplicaError> {
        let sv = StateVector::decode_v1(remote_sv)
            .map_err(|e| ReplicaError::MalformedStateVector(e.to_string()))?;
        Ok(self.doc.transact().encode_diff_v1(&sv))
    }

    /// Full state encoded as a single update, suitable for persistence.
    pub fn snapshot(&self) -> Vec<u8> {
        self.doc
            .transact()
            .encode_state_as_update_v1(&StateVector::default())
    }

    /// Whether two replicas hold the same converged state.
    pub fn converged_with(&self, other: &Replica) -> bool {
        self.state_vector() == other.state_vector() && self.snapshot() == other.snapshot()
    }

    /// Underlying document, for tests that edit shared types directly.
    #[cfg(test)]
    pub(crate) fn doc(&self) -> &Doc {
        &self.doc
    }
}

impl Default for Replica {
    fn default() -> Self {
        Self::new()
    }
}
