//! Read-only mirror of the room list for HTTP handlers

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

use super::rooms::RoomSubscription;
use crate::lobby::room::Room;

#[derive(Clone, Default)]
pub struct RoomDirectory {
    rooms: Arc<RwLock<Arc<Vec<Room>>>>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> Vec<Room> {
        self.rooms.read().as_ref().clone()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }

    pub fn player_count(&self) -> usize {
        self.rooms.read().iter().map(|r| r.current_players).sum()
    }

    fn replace(&self, rooms: Arc<Vec<Room>>) {
        *self.rooms.write() = rooms;
    }

    /// Keep this directory in sync with a store subscription.
    pub fn spawn_mirror(&self, mut subscription: RoomSubscription) -> JoinHandle<()> {
        let directory = self.clone();
        tokio::spawn(async move {
            while let Some(rooms) = subscription.recv().await {
                directory.replace(rooms);
            }
            debug!("Room store closed, directory mirror stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::room::{PlayerState, RoomId, RoomSettings, Team};
    use crate::store::{RoomStore, SnapshotWriter};
    use crate::transport::testing::RecordingTransport;
    use uuid::Uuid;

    #[tokio::test]
    async fn mirror_follows_store() {
        let transport = Arc::new(RecordingTransport::new());
        let mut store = RoomStore::new(transport, SnapshotWriter::disabled());
        let directory = RoomDirectory::new();
        let mirror = directory.spawn_mirror(store.subscribe());

        store.upsert(Room::new(
            RoomId::from("a"),
            "a",
            PlayerState::new(Uuid::from_u128(1), "p", Team::Red),
            RoomSettings::default(),
        ));
        drop(store);
        mirror.await.unwrap();

        assert_eq!(directory.room_count(), 1);
        assert_eq!(directory.player_count(), 1);
    }
}
