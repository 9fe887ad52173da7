//! Actor Model for Document Room Management.
//!
//! This module implements the `Room`, which owns the state of a single
//! collaborative document in an isolated Tokio task.
//!
//! # Architecture
//!
//! - **State Ownership**: The `Room` owns the replica, the member list, awareness
//!   state and the flush scheduler. Nothing else can touch them.
//! - **Message Passing**: All interactions happen via `RoomEvent` messages sent to
//!   the actor's bounded mailbox; updates are applied and broadcast in arrival order.
//! - **Persistence**: Snapshot writes run in a spawned task whose `JoinHandle` the
//!   actor polls, so editing never waits for storage.
//! - **Lifecycle**: The room retires itself once it has no members and nothing
//!   left to flush, unregistering from the [`RoomRegistry`] first.

use crate::config::{Config, LimitsConfig, PersistenceConfig};
use crate::metrics;
use crate::persistence::{DocumentStore, FlushScheduler, RetryPolicy, StoreError, flush_with_retry};
use crate::state::registry::RoomRegistry;
use crate::state::replica::Replica;
use collab_proto::{DocumentId, Payload, PeerInfo, ServerMessage};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

mod types;

pub use types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActorState {
    Active,
    Draining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Continue,
    Stop,
}

/// Tunables shared by every room.
#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub mailbox_capacity: usize,
    pub debounce: Duration,
    pub retry: RetryPolicy,
    pub max_awareness_bytes: usize,
    /// How long a room nobody joined stays alive.
    pub linger: Duration,
}

impl RoomSettings {
    pub fn new(persistence: &PersistenceConfig, limits: &LimitsConfig) -> Self {
        Self {
            mailbox_capacity: limits.room_mailbox_capacity.max(1),
            debounce: Duration::from_millis(persistence.debounce_ms),
            retry: RetryPolicy::from(persistence),
            max_awareness_bytes: limits.max_awareness_bytes,
            linger: Duration::from_millis(limits.room_linger_ms),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.persistence, &config.limits)
    }
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self::new(&PersistenceConfig::default(), &LimitsConfig::default())
    }
}

struct Member {
    handle: MemberHandle,
    awareness: Option<Payload>,
}

type FlushResult = (u64, Instant, Result<(), StoreError>);

/// The Room Actor.
///
/// Owns the state of a single document and processes events sequentially.
pub struct Room {
    document_id: DocumentId,
    room_id: u64,
    replica: Replica,
    members: HashMap<ConnectionId, Member>,
    scheduler: FlushScheduler,
    store: Arc<dyn DocumentStore>,
    settings: RoomSettings,
    flush: Option<JoinHandle<FlushResult>>,
    linger: Option<Instant>,
    pending_evictions: Vec<ConnectionId>,
    registry: Weak<RoomRegistry>,
    state: ActorState,
}

impl Room {
    /// Create a Room Actor from loaded state and spawn it on `tracker`.
    pub fn spawn(
        document_id: DocumentId,
        room_id: u64,
        replica: Replica,
        store: Arc<dyn DocumentStore>,
        settings: RoomSettings,
        registry: Weak<RoomRegistry>,
        tracker: &TaskTracker,
    ) -> RoomHandle {
        let (tx, rx) = mpsc::channel(settings.mailbox_capacity);

        let actor = Self {
            document_id: document_id.clone(),
            room_id,
            replica,
            members: HashMap::new(),
            scheduler: FlushScheduler::new(settings.debounce),
            store,
            linger: Some(Instant::now() + settings.linger),
            settings,
            flush: None,
            pending_evictions: Vec::new(),
            registry,
            state: ActorState::Active,
        };

        metrics::inc_rooms();
        tracker.spawn(actor.run(rx));

        RoomHandle {
            document_id,
            room_id,
            tx,
        }
    }

    /// The main actor loop.
    async fn run(mut self, mut rx: mpsc::Receiver<RoomEvent>) {
        debug!(doc = %self.document_id, room = self.room_id, "Room started");

        loop {
            let deadline = self.scheduler.deadline();
            let linger = self.linger;

            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => {
                        if self.handle_event(event).await == Control::Stop {
                            break;
                        }
                    }
                    None => {
                        // Every handle is gone, including the registry's.
                        self.drain_for_shutdown().await;
                        break;
                    }
                },
                joined = wait_flush(&mut self.flush) => {
                    self.flush = None;
                    self.on_flush_finished(joined);
                }
                _ = sleep_until(deadline) => {
                    self.start_flush();
                }
                _ = sleep_until(linger) => {
                    self.linger = None;
                }
            }

            self.process_evictions();

            if self.should_retire() {
                break;
            }
        }

        self.retire(rx).await;
    }

    async fn handle_event(&mut self, event: RoomEvent) -> Control {
        match event {
            RoomEvent::Join { member, reply_tx } => {
                let result = self.handle_join(member);
                let _ = reply_tx.send(result);
            }
            RoomEvent::SyncStep2 {
                connection_id,
                state_vector,
                reply_tx,
            } => {
                let result = self.handle_sync_step2(connection_id, &state_vector);
                let _ = reply_tx.send(result);
            }
            RoomEvent::Update {
                connection_id,
                update,
                reply_tx,
            } => {
                let result = self.handle_update(connection_id, update);
                let _ = reply_tx.send(result);
            }
            RoomEvent::Awareness {
                connection_id,
                awareness,
                reply_tx,
            } => {
                let result = self.handle_awareness(connection_id, awareness);
                let _ = reply_tx.send(result);
            }
            RoomEvent::Leave {
                connection_id,
                reply_tx,
            } => {
                let was_member = self.handle_leave(connection_id);
                let _ = reply_tx.send(was_member);
            }
            RoomEvent::Shutdown { reply_tx } => {
                self.drain_for_shutdown().await;
                let _ = reply_tx.send(());
                return Control::Stop;
            }
        }
        Control::Continue
    }

    fn handle_join(&mut self, member: MemberHandle) -> Result<JoinAck, RoomError> {
        if self.state == ActorState::Draining {
            return Err(RoomError::Closed);
        }

        let connection_id = member.connection_id;
        let state_vector = self.replica.state_vector();
        self.linger = None;
        let previous = self.members.insert(
            connection_id,
            Member {
                handle: member,
                awareness: None,
            },
        );

        // A re-join starts without a cursor; peers must drop the old one.
        if let Some(previous) = previous
            && previous.awareness.is_some()
        {
            let removal = ServerMessage::Awareness {
                document_id: self.document_id.clone(),
                client_id: connection_id,
                user_id: previous.handle.identity.user_id.clone(),
                awareness: None,
            };
            if let Some(frame) = encode(&removal) {
                self.broadcast(&frame, Some(connection_id));
            }
        }

        // Joiner sees, in order: our state vector, every peer's cursor, the roster.
        let step1 = ServerMessage::SyncStep1 {
            document_id: self.document_id.clone(),
            state_vector: Payload::from(state_vector.clone()),
        };
        if let Some(frame) = encode(&step1) {
            self.send_to(connection_id, frame);
        }

        let peer_awareness: Vec<ServerMessage> = self
            .members
            .iter()
            .filter(|(id, _)| **id != connection_id)
            .filter_map(|(id, m)| {
                m.awareness.as_ref().map(|a| ServerMessage::Awareness {
                    document_id: self.document_id.clone(),
                    client_id: *id,
                    user_id: m.handle.identity.user_id.clone(),
                    awareness: Some(a.clone()),
                })
            })
            .collect();
        for msg in &peer_awareness {
            if let Some(frame) = encode(msg) {
                self.send_to(connection_id, frame);
            }
        }

        self.broadcast_presence();

        info!(
            doc = %self.document_id,
            conn = connection_id,
            members = self.members.len(),
            "Member joined"
        );

        Ok(JoinAck {
            state_vector,
            members: self.members.len(),
        })
    }

    fn handle_sync_step2(
        &mut self,
        connection_id: ConnectionId,
        state_vector: &Payload,
    ) -> Result<(), RoomError> {
        if !self.members.contains_key(&connection_id) {
            return Err(RoomError::NotMember);
        }

        let diff = self.replica.diff(state_vector.as_bytes())?;
        let update = ServerMessage::Update {
            document_id: self.document_id.clone(),
            update: Payload::from(diff),
        };
        if let Some(frame) = encode(&update) {
            self.send_to(connection_id, frame);
        }
        if let Some(frame) = encode(&ServerMessage::synced(self.document_id.clone())) {
            self.send_to(connection_id, frame);
        }
        debug!(doc = %self.document_id, conn = connection_id, "Initial sync sent");
        Ok(())
    }

    fn handle_update(
        &mut self,
        connection_id: ConnectionId,
        update: Payload,
    ) -> Result<usize, RoomError> {
        if !self.members.contains_key(&connection_id) {
            return Err(RoomError::NotMember);
        }

        self.replica.apply(update.as_bytes())?;
        self.scheduler.on_mutation(Instant::now());

        let msg = ServerMessage::Update {
            document_id: self.document_id.clone(),
            update,
        };
        let recipients = match encode(&msg) {
            Some(frame) => self.broadcast(&frame, Some(connection_id)),
            None => 0,
        };
        metrics::record_update(recipients);
        Ok(recipients)
    }

    fn handle_awareness(
        &mut self,
        connection_id: ConnectionId,
        awareness: Payload,
    ) -> Result<usize, RoomError> {
        let max = self.settings.max_awareness_bytes;
        if awareness.len() > max {
            return Err(RoomError::AwarenessTooLarge {
                size: awareness.len(),
                max,
            });
        }
        let Some(member) = self.members.get_mut(&connection_id) else {
            return Err(RoomError::NotMember);
        };

        member.awareness = Some(awareness.clone());
        let msg = ServerMessage::Awareness {
            document_id: self.document_id.clone(),
            client_id: connection_id,
            user_id: member.handle.identity.user_id.clone(),
            awareness: Some(awareness),
        };
        Ok(match encode(&msg) {
            Some(frame) => self.broadcast(&frame, Some(connection_id)),
            None => 0,
        })
    }

    fn handle_leave(&mut self, connection_id: ConnectionId) -> bool {
        let Some(member) = self.members.remove(&connection_id) else {
            return false;
        };
        info!(
            doc = %self.document_id,
            conn = connection_id,
            members = self.members.len(),
            "Member left"
        );
        self.announce_departure(&member);
        true
    }

    /// Tell remaining members a peer is gone; flush now if nobody is left.
    fn announce_departure(&mut self, member: &Member) {
        let removal = ServerMessage::Awareness {
            document_id: self.document_id.clone(),
            client_id: member.handle.connection_id,
            user_id: member.handle.identity.user_id.clone(),
            awareness: None,
        };
        if let Some(frame) = encode(&removal) {
            self.broadcast(&frame, None);
        }
        self.broadcast_presence();

        if self.members.is_empty() {
            self.scheduler.expedite(Instant::now());
        }
    }

    fn broadcast_presence(&mut self) {
        let roster: BTreeMap<&str, &str> = self
            .members
            .values()
            .map(|m| {
                (
                    m.handle.identity.user_id.as_str(),
                    m.handle.identity.display_name.as_str(),
                )
            })
            .collect();
        let msg = ServerMessage::Presence {
            document_id: self.document_id.clone(),
            users: roster
                .into_iter()
                .map(|(user_id, display_name)| PeerInfo {
                    user_id: user_id.to_string(),
                    display_name: display_name.to_string(),
                })
                .collect(),
        };
        if let Some(frame) = encode(&msg) {
            self.broadcast(&frame, None);
        }
    }

    /// Queue `frame` for every member except `exclude`. Returns how many
    /// queues accepted it. Full queues mark their member for eviction.
    fn broadcast(&mut self, frame: &Frame, exclude: Option<ConnectionId>) -> usize {
        let mut delivered = 0;
        for (id, member) in &self.members {
            if exclude == Some(*id) {
                continue;
            }
            match member.handle.outbound.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => self.pending_evictions.push(*id),
                // Session already gone; its leave is on the way.
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    fn send_to(&mut self, connection_id: ConnectionId, frame: Frame) {
        let Some(member) = self.members.get(&connection_id) else {
            return;
        };
        if let Err(mpsc::error::TrySendError::Full(_)) = member.handle.outbound.try_send(frame) {
            self.pending_evictions.push(connection_id);
        }
    }

    fn process_evictions(&mut self) {
        while let Some(connection_id) = self.pending_evictions.pop() {
            let Some(member) = self.members.remove(&connection_id) else {
                continue;
            };
            warn!(
                doc = %self.document_id,
                conn = connection_id,
                "Outbound queue full, evicting slow consumer"
            );
            metrics::record_eviction();
            member.handle.evict.cancel();
            self.announce_departure(&member);
        }
    }

    fn start_flush(&mut self) {
        if self.flush.is_some() || !self.scheduler.is_dirty() {
            return;
        }
        let version = self.scheduler.begin();
        let snapshot = self.replica.snapshot();
        let store = Arc::clone(&self.store);
        let id = self.document_id.clone();
        let policy = self.settings.retry;
        debug!(doc = %self.document_id, version, bytes = snapshot.len(), "Flushing snapshot");

        self.flush = Some(tokio::spawn(async move {
            let started = Instant::now();
            let result = flush_with_retry(store, id, snapshot, policy).await;
            (version, started, result)
        }));
    }

    fn on_flush_finished(&mut self, joined: Result<FlushResult, tokio::task::JoinError>) {
        match joined {
            Ok((version, started, result)) => self.record_flush(version, started, result),
            Err(e) => {
                // Treat a panicked write like exhausted retries at the current version.
                let version = self.scheduler.version();
                error!(doc = %self.document_id, error = %e, "Flush task failed");
                self.record_flush(
                    version,
                    Instant::now(),
                    Err(StoreError::Unavailable(e.to_string())),
                );
            }
        }
    }

    fn record_flush(&mut self, version: u64, started: Instant, result: Result<(), StoreError>) {
        let elapsed = started.elapsed().as_secs_f64();
        let was_degraded = self.scheduler.is_degraded();
        match result {
            Ok(()) => {
                self.scheduler.complete(version);
                metrics::record_flush("ok", elapsed);
                if was_degraded {
                    metrics::dec_degraded();
                    info!(doc = %self.document_id, version, "Persistence recovered");
                }
                debug!(doc = %self.document_id, version, "Snapshot flushed");
            }
            Err(e) => {
                self.scheduler.abandon(version);
                metrics::record_flush("failed", elapsed);
                if !was_degraded {
                    metrics::inc_degraded();
                }
                error!(
                    doc = %self.document_id,
                    version,
                    persisted = self.scheduler.persisted_version(),
                    error = %e,
                    "Snapshot flush gave up; edits since the last persisted version are at risk"
                );
            }
        }
    }

    /// Await any in-flight write, then flush the latest state inline.
    async fn drain_for_shutdown(&mut self) {
        self.state = ActorState::Draining;

        if let Some(handle) = self.flush.take() {
            let joined = handle.await;
            self.on_flush_finished(joined);
        }

        if self.scheduler.is_dirty() {
            let version = self.scheduler.begin();
            let started = Instant::now();
            let result = flush_with_retry(
                Arc::clone(&self.store),
                self.document_id.clone(),
                self.replica.snapshot(),
                self.settings.retry,
            )
            .await;
            if result.is_err() {
                error!(doc = %self.document_id, version, "Unflushed edits lost at shutdown");
            }
            self.record_flush(version, started, result);
        }
    }

    fn should_retire(&self) -> bool {
        self.members.is_empty()
            && self.linger.is_none()
            && self.flush.is_none()
            && self.scheduler.is_settled()
    }

    /// Unregister, then refuse anything still queued in the mailbox.
    async fn retire(mut self, mut rx: mpsc::Receiver<RoomEvent>) {
        self.state = ActorState::Draining;
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_room(&self.document_id, self.room_id);
        }
        rx.close();

        while let Some(event) = rx.recv().await {
            match event {
                RoomEvent::Join { reply_tx, .. } => {
                    let _ = reply_tx.send(Err(RoomError::Closed));
                }
                RoomEvent::SyncStep2 { reply_tx, .. } => {
                    let _ = reply_tx.send(Err(RoomError::NotMember));
                }
                RoomEvent::Update { reply_tx, .. } | RoomEvent::Awareness { reply_tx, .. } => {
                    let _ = reply_tx.send(Err(RoomError::NotMember));
                }
                RoomEvent::Leave { reply_tx, .. } => {
                    let _ = reply_tx.send(false);
                }
                RoomEvent::Shutdown { reply_tx } => {
                    let _ = reply_tx.send(());
                }
            }
        }

        if self.scheduler.is_degraded() {
            metrics::dec_degraded();
            warn!(
                doc = %self.document_id,
                version = self.scheduler.version(),
                persisted = self.scheduler.persisted_version(),
                "Room retired with unpersisted edits"
            );
        }
        metrics::dec_rooms();
        debug!(doc = %self.document_id, room = self.room_id, "Room retired");
    }
}

fn encode(msg: &ServerMessage) -> Option<Frame> {
    match msg.to_json() {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            error!(kind = msg.kind(), error = %e, "Failed to encode frame");
            None
        }
    }
}

async fn wait_flush(
    flush: &mut Option<JoinHandle<FlushResult>>,
) -> Result<FlushResult, tokio::task::JoinError> {
    match flush {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
