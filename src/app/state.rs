//! Application state shared across routes

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::http::GuestSessions;
use crate::lobby::service::{LobbyHandle, LobbyService};
use crate::store::{JsonFileSnapshot, RoomDirectory, SnapshotWriter};
use crate::transport::{ConnectionHub, Transport};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub hub: Arc<ConnectionHub>,
    pub lobby: LobbyHandle,
    pub directory: RoomDirectory,
    pub guest_sessions: Arc<GuestSessions>,
}

impl AppState {
    /// Wire the hub, lobby actor and room directory together. The returned
    /// service must be spawned; the directory mirror is spawned here, so this
    /// must run inside a tokio runtime.
    pub fn new(config: Config) -> (Self, LobbyService) {
        let config = Arc::new(config);
        let hub = Arc::new(ConnectionHub::new());

        let snapshots = match &config.room_snapshot_path {
            Some(path) => {
                info!(path = %path.display(), "Writing room snapshots");
                let sink = Arc::new(JsonFileSnapshot::new(path.clone()));
                let (writer, _task) = SnapshotWriter::spawn(sink);
                writer
            }
            None => SnapshotWriter::disabled(),
        };

        let transport: Arc<dyn Transport> = hub.clone();
        let (service, lobby) = LobbyService::new(&config, transport, snapshots);

        let directory = RoomDirectory::new();
        directory.spawn_mirror(service.subscribe());

        let state = Self {
            config,
            hub,
            lobby,
            directory,
            guest_sessions: Arc::new(GuestSessions::new()),
        };
        (state, service)
    }
}
