//! Rooms, their lifecycle, and the actor that owns them

pub mod error;
pub mod lifecycle;
pub mod room;
pub mod service;

pub use error::LobbyError;
pub use lifecycle::{generate_start_positions, HitOutcome, RoomLifecycle};
pub use room::{GameMode, PeerId, PlayerState, Room, RoomId, RoomSettings, RoomStatus, Team};
pub use service::{LobbyCommand, LobbyHandle, LobbyService, QueueRequest};
