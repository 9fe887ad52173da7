//! Room Registry.
//!
//! Maps each open document to its single live [`Room`]. Concurrent first
//! joins for the same document share one slot and one `OnceCell`, so the
//! document is loaded once and exactly one room is spawned. A failed load is
//! shared by everyone waiting on the slot; the slot is then dropped and the
//! next join starts over.

use crate::error::JoinError;
use crate::persistence::{DocumentStore, StoreError};
use crate::state::replica::Replica;
use crate::state::room::{
    ConnectionId, JoinAck, MemberHandle, Room, RoomError, RoomHandle, RoomSettings,
};
use collab_proto::DocumentId;
use dashmap::DashMap;
use futures_util::future::join_all;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::OnceCell;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Attempts to join before giving up on a document whose rooms keep closing.
const MAX_JOIN_ATTEMPTS: usize = 8;

#[derive(Default)]
struct RoomSlot {
    room: OnceCell<Result<RoomHandle, JoinError>>,
}

impl RoomSlot {
    fn live(&self) -> Option<&RoomHandle> {
        self.room.get().and_then(|loaded| loaded.as_ref().ok())
    }
}

pub struct RoomRegistry {
    rooms: DashMap<DocumentId, Arc<RoomSlot>>,
    store: Arc<dyn DocumentStore>,
    settings: RoomSettings,
    create_missing: bool,
    tracker: TaskTracker,
    next_room_id: AtomicU64,
    closing: AtomicBool,
    this: Weak<RoomRegistry>,
}

impl RoomRegistry {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        settings: RoomSettings,
        create_missing: bool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            rooms: DashMap::new(),
            store,
            settings,
            create_missing,
            tracker: TaskTracker::new(),
            next_room_id: AtomicU64::new(1),
            closing: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    /// Live room for `id`, loading and spawning it if needed.
    pub async fn acquire(&self, id: &DocumentId) -> Result<RoomHandle, JoinError> {
        if self.closing.load(Ordering::Acquire) {
            return Err(JoinError::ShuttingDown);
        }

        let slot = self
            .rooms
            .entry(id.clone())
            .or_insert_with(|| Arc::new(RoomSlot::default()))
            .clone();

        match slot.room.get_or_init(|| self.load_room(id)).await {
            Ok(handle) => Ok(handle.clone()),
            Err(e) => {
                self.rooms.remove_if(id, |_, current| Arc::ptr_eq(current, &slot));
                Err(e.clone())
            }
        }
    }

    /// Acquire the room and add `member` to it.
    ///
    /// Retries when the room retired between lookup and join.
    pub async fn join(
        &self,
        id: &DocumentId,
        member: MemberHandle,
    ) -> Result<(RoomHandle, JoinAck), JoinError> {
        for _ in 0..MAX_JOIN_ATTEMPTS {
            let handle = self.acquire(id).await?;
            match handle.join(member.clone()).await {
                Ok(ack) => return Ok((handle, ack)),
                Err(RoomError::Closed) => {
                    // Normally already unregistered; covers a room task that died.
                    self.remove_room(id, handle.room_id());
                    debug!(doc = %id, room = handle.room_id(), "Room closed during join, retrying");
                }
                Err(e) => {
                    warn!(doc = %id, error = %e, "Unexpected join failure");
                }
            }
        }
        if self.closing.load(Ordering::Acquire) {
            Err(JoinError::ShuttingDown)
        } else {
            Err(JoinError::StorageUnavailable(format!(
                "room for {id} kept closing"
            )))
        }
    }

    /// Remove `connection_id` from the document's room, if it is live.
    pub async fn release(&self, id: &DocumentId, connection_id: ConnectionId) -> bool {
        let Some(handle) = self.get(id) else {
            return false;
        };
        handle.leave(connection_id).await
    }

    /// Live room handle, without loading.
    pub fn get(&self, id: &DocumentId) -> Option<RoomHandle> {
        self.rooms
            .get(id)
            .and_then(|slot| slot.live().cloned())
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.get(id).is_some()
    }

    /// Live (or loading) rooms.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Called by a retiring room. No-op if a newer room took the slot.
    pub(crate) fn remove_room(&self, id: &DocumentId, room_id: u64) {
        self.rooms.remove_if(id, |_, slot| {
            slot.live().is_some_and(|h| h.room_id() == room_id)
        });
    }

    /// Refuse new rooms, flush every room, and wait for all room tasks to exit.
    pub async fn shutdown(&self) {
        self.closing.store(true, Ordering::Release);

        let handles: Vec<RoomHandle> = self
            .rooms
            .iter()
            .filter_map(|slot| slot.live().cloned())
            .collect();
        info!(rooms = handles.len(), "Flushing rooms for shutdown");

        join_all(handles.iter().map(|h| h.shutdown())).await;

        self.tracker.close();
        self.tracker.wait().await;
        self.rooms.clear();
        info!("All rooms stopped");
    }

    async fn load_room(&self, id: &DocumentId) -> Result<RoomHandle, JoinError> {
        let stored = match self.store.load(id).await {
            Ok(stored) => stored,
            Err(StoreError::NotFound(_)) if self.create_missing => {
                self.store
                    .create(id)
                    .await
                    .map_err(|e| JoinError::StorageUnavailable(e.to_string()))?;
                info!(doc = %id, "Created missing document");
                None
            }
            Err(StoreError::NotFound(_)) => return Err(JoinError::DocumentNotFound(id.clone())),
            Err(e) => {
                warn!(doc = %id, error = %e, "Document load failed");
                return Err(JoinError::StorageUnavailable(e.to_string()));
            }
        };

        let replica = match stored {
            Some(snapshot) => Replica::restore(&snapshot).map_err(|e| {
                warn!(doc = %id, error = %e, "Stored snapshot could not be decoded");
                JoinError::StorageUnavailable(format!("stored state is unreadable: {e}"))
            })?,
            None => Replica::new(),
        };

        if self.closing.load(Ordering::Acquire) {
            return Err(JoinError::ShuttingDown);
        }

        let room_id = self.next_room_id.fetch_add(1, Ordering::Relaxed);
        debug!(doc = %id, room = room_id, "Spawning room");
        Ok(Room::spawn(
            id.clone(),
            room_id,
            replica,
            Arc::clone(&self.store),
            self.settings.clone(),
            self.this.clone(),
            &self.tracker,
        ))
    }
}
