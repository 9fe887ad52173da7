//! Client and server frames.
//!
//! Both directions share one JSON shape: a `type` discriminator in kebab-case
//! and camelCase fields.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ErrorCode, ProtocolError};
use crate::payload::Payload;

/// Opaque document identifier chosen by the metadata service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Borrow as `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the empty string, which no document may use.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One entry of a presence roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    /// Stable user identifier from the credential.
    pub user_id: String,
    /// Human readable name.
    pub display_name: String,
}

/// Frames sent by editors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
#[allow(missing_docs)]
pub enum ClientMessage {
    /// In-band credential when none was supplied on the upgrade request.
    Auth { token: String },
    /// Subscribe to a document.
    Join { document_id: DocumentId },
    /// Reply to `sync-step-1` with the client's own state vector.
    #[serde(rename = "sync-step-2")]
    SyncStep2 {
        document_id: DocumentId,
        state_vector: Payload,
    },
    /// Incremental CRDT update.
    Update {
        document_id: DocumentId,
        update: Payload,
    },
    /// Ephemeral cursor/selection state.
    Awareness {
        document_id: DocumentId,
        awareness: Payload,
    },
    /// Unsubscribe from a document.
    Leave { document_id: DocumentId },
}

impl ClientMessage {
    /// Decode one text frame.
    pub fn from_json(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(ProtocolError::Malformed)
    }

    /// Encode to a text frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Document this frame targets, if any.
    pub fn document_id(&self) -> Option<&DocumentId> {
        match self {
            Self::Auth { .. } => None,
            Self::Join { document_id }
            | Self::SyncStep2 { document_id, .. }
            | Self::Update { document_id, .. }
            | Self::Awareness { document_id, .. }
            | Self::Leave { document_id } => Some(document_id),
        }
    }

    /// Frame type name, for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::Join { .. } => "join",
            Self::SyncStep2 { .. } => "sync-step-2",
            Self::Update { .. } => "update",
            Self::Awareness { .. } => "awareness",
            Self::Leave { .. } => "leave",
        }
    }
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
#[allow(missing_docs)]
pub enum ServerMessage {
    /// Handshake accepted.
    Authenticated {
        connection_id: u64,
        user_id: String,
        display_name: String,
    },
    /// Server state vector; the client answers with `sync-step-2`.
    #[serde(rename = "sync-step-1")]
    SyncStep1 {
        document_id: DocumentId,
        state_vector: Payload,
    },
    /// Initial sync for the document is complete.
    Synced { document_id: DocumentId },
    /// CRDT update, either a catch-up diff or a peer's edit.
    Update {
        document_id: DocumentId,
        update: Payload,
    },
    /// A peer's awareness state; `null` means the peer went away.
    Awareness {
        document_id: DocumentId,
        client_id: u64,
        user_id: String,
        awareness: Option<Payload>,
    },
    /// Distinct users currently in the document.
    Presence {
        document_id: DocumentId,
        users: Vec<PeerInfo>,
    },
    Error {
        code: ErrorCode,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        document_id: Option<DocumentId>,
    },
}

impl ServerMessage {
    /// `synced` ack.
    pub fn synced(document_id: DocumentId) -> Self {
        Self::Synced { document_id }
    }

    /// Connection-level error.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
            document_id: None,
        }
    }

    /// Error scoped to one document.
    pub fn document_error(code: ErrorCode, message: impl Into<String>, document_id: DocumentId) -> Self {
        Self::Error {
            code,
            message: message.into(),
            document_id: Some(document_id),
        }
    }

    /// Encode to a text frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Decode one text frame.
    pub fn from_json(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(ProtocolError::Malformed)
    }

    /// Frame type name, for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authenticated { .. } => "authenticated",
            Self::SyncStep1 { .. } => "sync-step-1",
            Self::Synced { .. } => "synced",
            Self::Update { .. } => "update",
            Self::Awareness { .. } => "awareness",
            Self::Presence { .. } => "presence",
            Self::Error { .. } => "error",
        }
    }
}
