//! Per-connection synchronization session.
//!
//! A session authenticates its socket, then multiplexes the client's frames,
//! the frames rooms queue for it, and its own timers in a single `select!`
//! loop. For every joined document it tracks where the client is in the
//! initial sync:
//!
//! ```text
//! Unjoined --join--> Syncing --sync-step-2--> Synced
//!     ^                 |                       |
//!     +---- leave / sync timeout / disconnect --+
//! ```
//!
//! Rooms never block on a session: they `try_send` into its bounded
//! outbound queue and cancel its evict token when the queue is full.

use crate::auth::{AuthError, Gatekeeper, Identity};
use crate::config::LimitsConfig;
use crate::error::{JoinError, SessionError};
use crate::metrics;
use crate::state::{ConnectionId, Frame, MemberHandle, RoomError, RoomHandle, RoomRegistry};
use collab_proto::{ClientMessage, DocumentId, ErrorCode, Payload, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub type WsStream = WebSocketStream<TcpStream>;

/// Shortest interval between sync-timeout sweeps.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(50);

/// Upper bound on sending the final error frame and close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// State shared by every session.
pub struct SessionContext {
    pub registry: Arc<RoomRegistry>,
    pub gatekeeper: Gatekeeper,
    pub limits: LimitsConfig,
    /// Cancelled once at server shutdown.
    pub shutdown: CancellationToken,
    next_connection_id: AtomicU64,
}

impl SessionContext {
    pub fn new(
        registry: Arc<RoomRegistry>,
        gatekeeper: Gatekeeper,
        limits: LimitsConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            gatekeeper,
            limits,
            shutdown,
            next_connection_id: AtomicU64::new(1),
        }
    }

    fn next_connection_id(&self) -> ConnectionId {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncPhase {
    Syncing { since: Instant },
    Synced,
}

struct JoinedDocument {
    room: RoomHandle,
    phase: SyncPhase,
}

/// Serve one upgraded WebSocket until it closes.
///
/// `upgrade_token` is the credential found on the upgrade request, if any.
#[instrument(skip_all, fields(%addr))]
pub async fn serve(
    mut ws: WsStream,
    upgrade_token: Option<String>,
    addr: SocketAddr,
    ctx: Arc<SessionContext>,
) {
    let outcome = tokio::select! {
        result = handshake(&mut ws, upgrade_token, &ctx) => result,
        _ = ctx.shutdown.cancelled() => Err(SessionError::ShuttingDown),
    };
    let identity = match outcome {
        Ok(identity) => identity,
        Err(SessionError::Transport(e)) => {
            debug!(error = %e, "Connection lost during handshake");
            return;
        }
        Err(e) => {
            metrics::record_rejected(match &e {
                SessionError::Auth(auth) => auth.error_code(),
                other => other.error_code(),
            });
            info!(error = %e, "Connection rejected");
            close_with(&mut ws, &e).await;
            return;
        }
    };

    let connection_id = ctx.next_connection_id();
    let (outbound_tx, outbound_rx) = mpsc::channel(ctx.limits.client_queue_capacity.max(1));
    let mut session = Session {
        connection_id,
        identity: Arc::new(identity),
        ws,
        ctx,
        outbound_tx,
        outbound_rx,
        evict: CancellationToken::new(),
        docs: HashMap::new(),
    };

    metrics::inc_connections();
    info!(
        conn = connection_id,
        user = %session.identity.user_id,
        "Session authenticated"
    );

    let result = session.run().await;
    session.leave_all().await;

    match result {
        Ok(()) => info!(conn = connection_id, "Session closed by client"),
        Err(SessionError::Transport(e)) => {
            debug!(conn = connection_id, error = %e, "Session transport error");
        }
        Err(e) => {
            if matches!(e, SessionError::ProtocolViolation(_)) {
                metrics::record_protocol_error(ErrorCode::ProtocolViolation.as_str());
            }
            info!(conn = connection_id, error = %e, "Session terminated");
            close_with(&mut session.ws, &e).await;
        }
    }
    metrics::dec_connections();
}

/// Resolve the connection's identity from the upgrade credential or an
/// in-band `auth` frame.
async fn handshake(
    ws: &mut WsStream,
    upgrade_token: Option<String>,
    ctx: &SessionContext,
) -> Result<Identity, SessionError> {
    let gatekeeper = &ctx.gatekeeper;
    let token = match upgrade_token {
        Some(token) => token,
        None => {
            let first = tokio::time::timeout(gatekeeper.handshake_timeout(), next_text(ws))
                .await
                .map_err(|_| AuthError::HandshakeTimeout)??;
            match ClientMessage::from_json(&first) {
                Ok(ClientMessage::Auth { token }) => token,
                _ => return Err(AuthError::MissingToken.into()),
            }
        }
    };

    let identity = gatekeeper.authenticate(&token)?;
    Ok(identity)
}

/// Next text frame, skipping control frames.
async fn next_text(ws: &mut WsStream) -> Result<String, SessionError> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text),
            Some(Ok(Message::Binary(_))) => return Err(AuthError::Malformed("binary frame").into()),
            Some(Ok(Message::Close(_))) | None => {
                return Err(SessionError::Transport(
                    tokio_tungstenite::tungstenite::Error::ConnectionClosed,
                ));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

/// Send the error frame for `e` (if any) and close with its code.
///
/// A peer that stopped reading gets [`CLOSE_TIMEOUT`] before the socket is
/// dropped without a close handshake.
async fn close_with(ws: &mut WsStream, e: &SessionError) {
    let close = async {
        if let Some(reply) = e.to_reply()
            && let Ok(json) = reply.to_json()
        {
            let _ = ws.send(Message::Text(json)).await;
        }
        let frame = CloseFrame {
            code: CloseCode::from(e.close_code()),
            reason: e.error_code().into(),
        };
        let _ = ws.close(Some(frame)).await;
    };
    if tokio::time::timeout(CLOSE_TIMEOUT, close).await.is_err() {
        debug!(error_code = e.error_code(), "Peer not reading, dropping socket without close handshake");
    }
}

struct Session {
    connection_id: ConnectionId,
    identity: Arc<Identity>,
    ws: WsStream,
    ctx: Arc<SessionContext>,
    outbound_tx: mpsc::Sender<Frame>,
    outbound_rx: mpsc::Receiver<Frame>,
    evict: CancellationToken,
    docs: HashMap<DocumentId, JoinedDocument>,
}

impl Session {
    async fn run(&mut self) -> Result<(), SessionError> {
        self.send(&ServerMessage::Authenticated {
            connection_id: self.connection_id,
            user_id: self.identity.user_id.clone(),
            display_name: self.identity.display_name.clone(),
        })
        .await?;

        let sync_timeout = Duration::from_millis(self.ctx.limits.sync_timeout_ms);
        let mut sweep = tokio::time::interval((sync_timeout / 4).max(MIN_SWEEP_INTERVAL));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let shutdown = self.ctx.shutdown.clone();
        let evict = self.evict.clone();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => return Err(SessionError::ShuttingDown),
                _ = evict.cancelled() => return Err(SessionError::SlowConsumer),
                Some(frame) = self.outbound_rx.recv() => {
                    self.write(Message::Text(frame.to_string())).await?;
                }
                incoming = self.ws.next() => match incoming {
                    Some(Ok(Message::Text(text))) => self.handle_frame(&text).await?,
                    Some(Ok(Message::Binary(_))) => {
                        return Err(SessionError::ProtocolViolation(
                            "binary frames are not supported".into(),
                        ));
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    // Ping/pong are answered by tungstenite.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                },
                _ = sweep.tick() => self.expire_stalled_syncs(sync_timeout).await?,
            }
        }
    }

    async fn handle_frame(&mut self, text: &str) -> Result<(), SessionError> {
        let msg = ClientMessage::from_json(text)
            .map_err(|e| SessionError::ProtocolViolation(e.to_string()))?;

        if let Some(id) = msg.document_id()
            && id.is_empty()
        {
            metrics::record_protocol_error(ErrorCode::InvalidPayload.as_str());
            return self
                .send(&ServerMessage::error(
                    ErrorCode::InvalidPayload,
                    format!("{} requires a documentId", msg.kind()),
                ))
                .await;
        }

        match msg {
            ClientMessage::Auth { .. } => {
                debug!(conn = self.connection_id, "Ignoring auth frame on authenticated session");
                Ok(())
            }
            ClientMessage::Join { document_id } => self.handle_join(document_id).await,
            ClientMessage::SyncStep2 {
                document_id,
                state_vector,
            } => self.handle_sync_step2(document_id, state_vector).await,
            ClientMessage::Update {
                document_id,
                update,
            } => self.handle_update(document_id, update).await,
            ClientMessage::Awareness {
                document_id,
                awareness,
            } => self.handle_awareness(document_id, awareness).await,
            ClientMessage::Leave { document_id } => {
                if let Some(doc) = self.docs.remove(&document_id) {
                    doc.room.leave(self.connection_id).await;
                    debug!(conn = self.connection_id, doc = %document_id, "Left document");
                }
                Ok(())
            }
        }
    }

    async fn handle_join(&mut self, document_id: DocumentId) -> Result<(), SessionError> {
        let max = self.ctx.limits.max_documents_per_connection;
        if !self.docs.contains_key(&document_id) && self.docs.len() >= max {
            return self.reject_join(&document_id, JoinError::TooManyDocuments(max)).await;
        }

        match self.ctx.registry.join(&document_id, self.member()).await {
            Ok((room, ack)) => {
                debug!(
                    conn = self.connection_id,
                    doc = %document_id,
                    members = ack.members,
                    "Joined document"
                );
                self.docs.insert(
                    document_id,
                    JoinedDocument {
                        room,
                        phase: SyncPhase::Syncing {
                            since: Instant::now(),
                        },
                    },
                );
                Ok(())
            }
            Err(JoinError::ShuttingDown) => Err(SessionError::ShuttingDown),
            Err(e) => self.reject_join(&document_id, e).await,
        }
    }

    async fn reject_join(&mut self, document_id: &DocumentId, e: JoinError) -> Result<(), SessionError> {
        info!(conn = self.connection_id, doc = %document_id, error = %e, "Join refused");
        metrics::record_protocol_error(e.wire_code().as_str());
        self.send(&e.to_reply(document_id)).await
    }

    async fn handle_sync_step2(
        &mut self,
        document_id: DocumentId,
        state_vector: Payload,
    ) -> Result<(), SessionError> {
        let Some(room) = self.room(&document_id) else {
            return self.not_joined(&document_id).await;
        };
        match room.sync_step2(self.connection_id, state_vector).await {
            Ok(()) => {
                if let Some(doc) = self.docs.get_mut(&document_id) {
                    doc.phase = SyncPhase::Synced;
                }
                Ok(())
            }
            Err(e) => self.room_error(&document_id, e).await,
        }
    }

    async fn handle_update(
        &mut self,
        document_id: DocumentId,
        update: Payload,
    ) -> Result<(), SessionError> {
        let Some(room) = self.room(&document_id) else {
            return self.not_joined(&document_id).await;
        };
        match room.apply_update(self.connection_id, update).await {
            Ok(_) => Ok(()),
            Err(e) => self.room_error(&document_id, e).await,
        }
    }

    async fn handle_awareness(
        &mut self,
        document_id: DocumentId,
        awareness: Payload,
    ) -> Result<(), SessionError> {
        let Some(room) = self.room(&document_id) else {
            return self.not_joined(&document_id).await;
        };
        match room.apply_awareness(self.connection_id, awareness).await {
            Ok(_) => Ok(()),
            Err(e) => self.room_error(&document_id, e).await,
        }
    }

    /// Map a room refusal onto the wire. Undecodable CRDT bytes end the
    /// session; everything else is scoped to the document.
    async fn room_error(&mut self, document_id: &DocumentId, e: RoomError) -> Result<(), SessionError> {
        if e.is_protocol_violation() {
            return Err(SessionError::ProtocolViolation(format!("{document_id}: {e}")));
        }
        match e {
            RoomError::AwarenessTooLarge { .. } => {
                metrics::record_protocol_error(ErrorCode::InvalidPayload.as_str());
                self.send(&ServerMessage::document_error(
                    ErrorCode::InvalidPayload,
                    e.to_string(),
                    document_id.clone(),
                ))
                .await
            }
            // The room dropped us (eviction or retirement); forget it.
            _ => {
                self.docs.remove(document_id);
                self.not_joined(document_id).await
            }
        }
    }

    async fn not_joined(&mut self, document_id: &DocumentId) -> Result<(), SessionError> {
        metrics::record_protocol_error(ErrorCode::NotJoined.as_str());
        self.send(&ServerMessage::document_error(
            ErrorCode::NotJoined,
            format!("not joined to {document_id}"),
            document_id.clone(),
        ))
        .await
    }

    /// Release documents whose initial sync never completed.
    async fn expire_stalled_syncs(&mut self, timeout: Duration) -> Result<(), SessionError> {
        let now = Instant::now();
        let stalled: Vec<DocumentId> = self
            .docs
            .iter()
            .filter(|(_, doc)| {
                matches!(doc.phase, SyncPhase::Syncing { since } if now.duration_since(since) >= timeout)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for document_id in stalled {
            if let Some(doc) = self.docs.remove(&document_id) {
                doc.room.leave(self.connection_id).await;
            }
            warn!(conn = self.connection_id, doc = %document_id, "Initial sync timed out");
            metrics::record_protocol_error(ErrorCode::SyncTimeout.as_str());
            self.send(&ServerMessage::document_error(
                ErrorCode::SyncTimeout,
                "no sync-step-2 received in time",
                document_id,
            ))
            .await?;
        }
        Ok(())
    }

    async fn leave_all(&mut self) {
        for (_, doc) in self.docs.drain() {
            doc.room.leave(self.connection_id).await;
        }
    }

    fn room(&self, document_id: &DocumentId) -> Option<RoomHandle> {
        self.docs.get(document_id).map(|doc| doc.room.clone())
    }

    fn member(&self) -> MemberHandle {
        MemberHandle {
            connection_id: self.connection_id,
            identity: Arc::clone(&self.identity),
            outbound: self.outbound_tx.clone(),
            evict: self.evict.clone(),
        }
    }

    /// Write a session-originated frame directly to the socket.
    async fn send(&mut self, msg: &ServerMessage) -> Result<(), SessionError> {
        let json = msg
            .to_json()
            .map_err(|e| SessionError::ProtocolViolation(e.to_string()))?;
        self.write(Message::Text(json)).await
    }

    /// Socket write that gives up as soon as the session is told to stop, so
    /// a peer that stopped reading cannot pin the session.
    async fn write(&mut self, msg: Message) -> Result<(), SessionError> {
        tokio::select! {
            biased;

            _ = self.ctx.shutdown.cancelled() => Err(SessionError::ShuttingDown),
            _ = self.evict.cancelled() => Err(SessionError::SlowConsumer),
            sent = self.ws.send(msg) => Ok(sent?),
        }
    }
}
