use crate::auth::Identity;
use collab_proto::{DocumentId, Payload};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::state::replica::ReplicaError;

/// Process-unique connection identifier.
pub type ConnectionId = u64;

/// Pre-encoded JSON text frame, shared between all recipients.
pub type Frame = Arc<str>;

/// What a room needs to reach a connection.
#[derive(Debug, Clone)]
pub struct MemberHandle {
    pub connection_id: ConnectionId,
    pub identity: Arc<Identity>,
    /// Bounded outbound queue drained by the connection's session task.
    pub outbound: mpsc::Sender<Frame>,
    /// Cancelled by the room when the member cannot keep up.
    pub evict: CancellationToken,
}

/// Reply to a successful join.
#[derive(Debug)]
pub struct JoinAck {
    /// Room state vector, also sent to the joiner as `sync-step-1`.
    pub state_vector: Vec<u8>,
    /// Members after the join, including the joiner.
    pub members: usize,
}

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("{0}")]
    Replica(#[from] ReplicaError),
    #[error("awareness payload of {size} bytes exceeds the {max} byte limit")]
    AwarenessTooLarge { size: usize, max: usize },
    #[error("connection has not joined this document")]
    NotMember,
    #[error("room closed")]
    Closed,
}

impl RoomError {
    /// Whether the client sent something undecodable.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::Replica(_))
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Replica(ReplicaError::MalformedUpdate(_)) => "malformed_update",
            Self::Replica(ReplicaError::MalformedStateVector(_)) => "malformed_state_vector",
            Self::AwarenessTooLarge { .. } => "awareness_too_large",
            Self::NotMember => "not_member",
            Self::Closed => "closed",
        }
    }
}

/// Events that can be sent to a Room Actor.
#[derive(Debug)]
pub enum RoomEvent {
    /// Connection subscribing to the document.
    Join {
        member: MemberHandle,
        reply_tx: oneshot::Sender<Result<JoinAck, RoomError>>,
    },
    /// Client state vector; the room replies on the member's queue with the
    /// missing updates followed by `synced`.
    SyncStep2 {
        connection_id: ConnectionId,
        state_vector: Payload,
        reply_tx: oneshot::Sender<Result<(), RoomError>>,
    },
    /// Client edit. Replies with the number of peers it was forwarded to.
    Update {
        connection_id: ConnectionId,
        update: Payload,
        reply_tx: oneshot::Sender<Result<usize, RoomError>>,
    },
    /// Client awareness. Replies with the number of peers it was forwarded to.
    Awareness {
        connection_id: ConnectionId,
        awareness: Payload,
        reply_tx: oneshot::Sender<Result<usize, RoomError>>,
    },
    /// Connection leaving (explicit `leave`, sync timeout, or disconnect).
    Leave {
        connection_id: ConnectionId,
        reply_tx: oneshot::Sender<bool>,
    },
    /// Flush synchronously and stop.
    Shutdown { reply_tx: oneshot::Sender<()> },
}

/// Cloneable address of a running room.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    pub(crate) document_id: DocumentId,
    pub(crate) room_id: u64,
    pub(crate) tx: mpsc::Sender<RoomEvent>,
}

impl RoomHandle {
    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    /// Distinguishes successive rooms for the same document.
    pub fn room_id(&self) -> u64 {
        self.room_id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, RoomError>>) -> RoomEvent,
    ) -> Result<T, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| RoomError::Closed)?;
        reply_rx.await.map_err(|_| RoomError::Closed)?
    }

    pub async fn join(&self, member: MemberHandle) -> Result<JoinAck, RoomError> {
        self.request(|reply_tx| RoomEvent::Join { member, reply_tx })
            .await
    }

    pub async fn sync_step2(
        &self,
        connection_id: ConnectionId,
        state_vector: Payload,
    ) -> Result<(), RoomError> {
        self.request(|reply_tx| RoomEvent::SyncStep2 {
            connection_id,
            state_vector,
            reply_tx,
        })
        .await
    }

    pub async fn apply_update(
        &self,
        connection_id: ConnectionId,
        update: Payload,
    ) -> Result<usize, RoomError> {
        self.request(|reply_tx| RoomEvent::Update {
            connection_id,
            update,
            reply_tx,
        })
        .await
    }

    pub async fn apply_awareness(
        &self,
        connection_id: ConnectionId,
        awareness: Payload,
    ) -> Result<usize, RoomError> {
        self.request(|reply_tx| RoomEvent::Awareness {
            connection_id,
            awareness,
            reply_tx,
        })
        .await
    }

    /// Remove a member. Returns whether it was present.
    pub async fn leave(&self, connection_id: ConnectionId) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        let event = RoomEvent::Leave {
            connection_id,
            reply_tx,
        };
        if self.tx.send(event).await.is_err() {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// Flush and stop. Returns once the room has persisted (or given up).
    pub async fn shutdown(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(RoomEvent::Shutdown { reply_tx }).await.is_ok() {
            let _ = reply_rx.await;
        }
    }
}
