//! Authoritative room collection with change notification
//!
//! The store is owned by the lobby actor, so every write is a whole-record
//! `upsert` or `remove` applied in call order. After each effective write the
//! store queues a snapshot for the background writer, fans the change out to
//! local subscribers and broadcasts the full room list to every connected
//! peer.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::snapshot::SnapshotWriter;
use crate::lobby::room::{Room, RoomId};
use crate::transport::Transport;
use crate::ws::protocol::ServerMsg;

/// Local subscriber buffer. Each item carries the full list, so a lagging
/// subscriber only ever skips intermediate states.
const CHANGE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum RoomChange {
    Upserted(Room),
    Removed(RoomId),
}

#[derive(Debug, Clone)]
pub struct StoreChange {
    pub change: RoomChange,
    pub rooms: Arc<Vec<Room>>,
}

pub struct RoomStore {
    rooms: HashMap<RoomId, Room>,
    changes: broadcast::Sender<StoreChange>,
    transport: Arc<dyn Transport>,
    snapshots: SnapshotWriter,
}

impl RoomStore {
    pub fn new(transport: Arc<dyn Transport>, snapshots: SnapshotWriter) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            rooms: HashMap::new(),
            changes,
            transport,
            snapshots,
        }
    }

    /// All rooms, oldest first
    pub fn get_all(&self) -> Vec<Room> {
        let mut rooms: Vec<Room> = self.rooms.values().cloned().collect();
        rooms.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        rooms
    }

    pub fn get_by_id(&self, id: &RoomId) -> Option<Room> {
        self.rooms.get(id).cloned()
    }

    pub fn contains(&self, id: &RoomId) -> bool {
        self.rooms.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Insert or overwrite a room by id.
    ///
    /// Counters are recomputed from membership and the revision is bumped.
    /// A room without members is removed instead and `None` is returned.
    /// Writing a record identical to the stored one is a no-op.
    pub fn upsert(&mut self, mut room: Room) -> Option<Room> {
        room.sync_counters();

        if room.players.is_empty() {
            self.remove(&room.id);
            return None;
        }

        if let Some(existing) = self.rooms.get(&room.id) {
            room.revision = existing.revision;
            if *existing == room {
                return Some(room);
            }
        }
        room.revision += 1;

        self.rooms.insert(room.id.clone(), room.clone());
        debug!(room_id = %room.id, revision = room.revision, "Room upserted");
        self.on_change(RoomChange::Upserted(room.clone()));
        Some(room)
    }

    /// Delete a room. Returns the removed record, if any.
    pub fn remove(&mut self, id: &RoomId) -> Option<Room> {
        let removed = self.rooms.remove(id)?;
        debug!(room_id = %id, "Room removed");
        self.on_change(RoomChange::Removed(id.clone()));
        Some(removed)
    }

    /// Full room list after every change.
    pub fn subscribe(&self) -> RoomSubscription {
        RoomSubscription {
            rx: self.changes.subscribe(),
        }
    }

    /// Individual room records whenever they differ from the last seen value.
    pub fn subscribe_to_room(&self) -> RoomWatcher {
        RoomWatcher {
            rx: self.changes.subscribe(),
            seen: HashMap::new(),
        }
    }

    fn on_change(&self, change: RoomChange) {
        let rooms = Arc::new(self.get_all());
        self.snapshots.submit(rooms.clone());

        // No local subscribers is fine.
        let _ = self.changes.send(StoreChange {
            change,
            rooms: rooms.clone(),
        });

        self.transport.broadcast(&ServerMsg::RoomList {
            rooms: rooms.as_ref().clone(),
        });
    }
}

/// Receives the full room list after every store change. Drop to unsubscribe.
pub struct RoomSubscription {
    rx: broadcast::Receiver<StoreChange>,
}

impl RoomSubscription {
    /// Next room list, or `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<Arc<Vec<Room>>> {
        self.recv_change().await.map(|c| c.rooms)
    }

    pub async fn recv_change(&mut self) -> Option<StoreChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) => return Some(change),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Room subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Per-room change feed with a value-equality diff against the last record
/// seen for each room.
pub struct RoomWatcher {
    rx: broadcast::Receiver<StoreChange>,
    seen: HashMap<RoomId, Room>,
}

impl RoomWatcher {
    pub async fn recv(&mut self) -> Option<RoomChange> {
        loop {
            let change = match self.rx.recv().await {
                Ok(change) => change,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Room watcher lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            };

            match change.change {
                RoomChange::Upserted(room) => {
                    if self.seen.get(&room.id) == Some(&room) {
                        continue;
                    }
                    self.seen.insert(room.id.clone(), room.clone());
                    return Some(RoomChange::Upserted(room));
                }
                RoomChange::Removed(id) => {
                    self.seen.remove(&id);
                    return Some(RoomChange::Removed(id));
                }
            }
        }
    }
}
