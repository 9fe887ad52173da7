//! Error codes and decode errors.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Structured error code carried in `error` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Missing, malformed, or expired credential. Connection-fatal.
    Unauthenticated,
    /// The requested document does not exist. Scoped to one join.
    DocumentNotFound,
    /// The document store could not be reached. Scoped to one join.
    StorageUnavailable,
    /// Malformed frame or CRDT payload. Connection-fatal.
    ProtocolViolation,
    /// Message refers to a document this connection has not joined.
    NotJoined,
    /// A required field was empty.
    InvalidPayload,
    /// The client never answered `sync-step-1`.
    SyncTimeout,
    /// Per-connection document limit reached.
    TooManyDocuments,
    /// The client could not keep up with broadcast traffic. Connection-fatal.
    SlowConsumer,
    /// The server is shutting down.
    ShuttingDown,
}

impl ErrorCode {
    /// Wire representation, e.g. `DOCUMENT_NOT_FOUND`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::DocumentNotFound => "DOCUMENT_NOT_FOUND",
            Self::StorageUnavailable => "STORAGE_UNAVAILABLE",
            Self::ProtocolViolation => "PROTOCOL_VIOLATION",
            Self::NotJoined => "NOT_JOINED",
            Self::InvalidPayload => "INVALID_PAYLOAD",
            Self::SyncTimeout => "SYNC_TIMEOUT",
            Self::TooManyDocuments => "TOO_MANY_DOCUMENTS",
            Self::SlowConsumer => "SLOW_CONSUMER",
            Self::ShuttingDown => "SHUTTING_DOWN",
        }
    }

    /// Whether the server closes the connection after sending this code.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated | Self::ProtocolViolation | Self::SlowConsumer | Self::ShuttingDown
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// WebSocket close codes used by the server.
pub mod close {
    /// Credential rejected.
    pub const UNAUTHENTICATED: u16 = 4401;
    /// No credential within the handshake window.
    pub const AUTH_TIMEOUT: u16 = 4408;
    /// Malformed frame or payload.
    pub const PROTOCOL_VIOLATION: u16 = 4400;
    /// Outbound queue overflowed.
    pub const SLOW_CONSUMER: u16 = 4429;
    /// Standard "going away" code used on shutdown.
    pub const GOING_AWAY: u16 = 1001;
}

/// Errors produced while decoding or encoding frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame was not valid JSON or did not match any message shape.
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// Serialization failed.
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}
