//! Unified error handling for collabd.
//!
//! Module-local errors (`AuthError`, `RoomError`, `StoreError`,
//! `ConfigError`) live next to their code. This module holds the errors that
//! cross module boundaries, with wire error codes, WebSocket close codes and
//! metric labels.

use crate::auth::AuthError;
use collab_proto::{DocumentId, ErrorCode, ServerMessage, close};
use thiserror::Error;
use tokio_tungstenite::tungstenite;

// ============================================================================
// Join Errors (scoped to one document, connection stays open)
// ============================================================================

#[derive(Debug, Clone, Error)]
pub enum JoinError {
    #[error("document not found: {0}")]
    DocumentNotFound(DocumentId),

    #[error("document store unavailable: {0}")]
    StorageUnavailable(String),

    #[error("server is shutting down")]
    ShuttingDown,

    #[error("too many open documents (limit {0})")]
    TooManyDocuments(usize),
}

impl JoinError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DocumentNotFound(_) => "document_not_found",
            Self::StorageUnavailable(_) => "storage_unavailable",
            Self::ShuttingDown => "shutting_down",
            Self::TooManyDocuments(_) => "too_many_documents",
        }
    }

    pub fn wire_code(&self) -> ErrorCode {
        match self {
            Self::DocumentNotFound(_) => ErrorCode::DocumentNotFound,
            Self::StorageUnavailable(_) => ErrorCode::StorageUnavailable,
            Self::ShuttingDown => ErrorCode::ShuttingDown,
            Self::TooManyDocuments(_) => ErrorCode::TooManyDocuments,
        }
    }

    /// `error` frame for the client that asked to join `document_id`.
    pub fn to_reply(&self, document_id: &DocumentId) -> ServerMessage {
        ServerMessage::document_error(self.wire_code(), self.to_string(), document_id.clone())
    }
}

// ============================================================================
// Session Errors (connection-fatal)
// ============================================================================

/// Reasons a session ends abnormally.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("outbound queue overflowed")]
    SlowConsumer,

    #[error("server shutting down")]
    ShuttingDown,

    #[error("websocket error: {0}")]
    Transport(#[from] tungstenite::Error),
}

impl SessionError {
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Auth(_) => "unauthenticated",
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::SlowConsumer => "slow_consumer",
            Self::ShuttingDown => "shutting_down",
            Self::Transport(_) => "transport",
        }
    }

    /// Error frame sent before closing, if the peer can still receive one.
    pub fn to_reply(&self) -> Option<ServerMessage> {
        let code = match self {
            Self::Auth(_) => ErrorCode::Unauthenticated,
            Self::ProtocolViolation(_) => ErrorCode::ProtocolViolation,
            Self::SlowConsumer => ErrorCode::SlowConsumer,
            Self::ShuttingDown => ErrorCode::ShuttingDown,
            Self::Transport(_) => return None,
        };
        Some(ServerMessage::error(code, self.to_string()))
    }

    /// WebSocket close code.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::Auth(AuthError::HandshakeTimeout) => close::AUTH_TIMEOUT,
            Self::Auth(_) => close::UNAUTHENTICATED,
            Self::ProtocolViolation(_) => close::PROTOCOL_VIOLATION,
            Self::SlowConsumer => close::SLOW_CONSUMER,
            Self::ShuttingDown | Self::Transport(_) => close::GOING_AWAY,
        }
    }
}
