//! Durable room snapshot, written off the lobby task
//!
//! The store hands every new room list to a [`SnapshotWriter`]. A background
//! task keeps only the latest list and writes it on the blocking pool, so a
//! burst of changes costs one file write and never stalls the actor.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::lobby::room::{Room, RoomId};

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("Snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Blocking sink for room snapshots. Always called from the blocking pool.
pub trait RoomPersistence: Send + Sync + 'static {
    fn save(&self, rooms: &[Room]) -> Result<(), PersistError>;
}

/// Room collection keyed by id, written as pretty JSON.
///
/// Written to a sibling temp file first and renamed into place so a crash
/// mid-write never leaves a truncated snapshot behind.
pub struct JsonFileSnapshot {
    path: PathBuf,
}

impl JsonFileSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl RoomPersistence for JsonFileSnapshot {
    fn save(&self, rooms: &[Room]) -> Result<(), PersistError> {
        let keyed: BTreeMap<&RoomId, &Room> = rooms.iter().map(|r| (&r.id, r)).collect();
        let json = serde_json::to_vec_pretty(&keyed)?;

        let tmp = self.temp_path();
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Non-blocking handle the store submits room lists to
pub struct SnapshotWriter {
    latest: watch::Sender<Arc<Vec<Room>>>,
}

impl SnapshotWriter {
    /// Start the writer task. It exits, after writing any pending list, once
    /// the writer is dropped.
    pub fn spawn(persistence: Arc<dyn RoomPersistence>) -> (Self, JoinHandle<()>) {
        let (latest, rx) = watch::channel(Arc::new(Vec::new()));
        let task = tokio::spawn(write_loop(persistence, rx));
        (Self { latest }, task)
    }

    /// Persistence disabled; submissions are discarded.
    pub fn disabled() -> Self {
        let (latest, _) = watch::channel(Arc::new(Vec::new()));
        Self { latest }
    }

    /// Replace the pending list. Never blocks.
    pub fn submit(&self, rooms: Arc<Vec<Room>>) {
        self.latest.send_replace(rooms);
    }
}

async fn write_loop(
    persistence: Arc<dyn RoomPersistence>,
    mut rx: watch::Receiver<Arc<Vec<Room>>>,
) {
    while rx.changed().await.is_ok() {
        let rooms = rx.borrow_and_update().clone();
        let sink = persistence.clone();
        match tokio::task::spawn_blocking(move || sink.save(&rooms)).await {
            Ok(Ok(())) => debug!("Room snapshot written"),
            Ok(Err(e)) => warn!(error = %e, "Failed to persist room snapshot"),
            Err(e) => warn!(error = %e, "Snapshot write task failed"),
        }
    }
}
