//! Room storage: authoritative store, durable snapshot, HTTP mirror

pub mod directory;
pub mod rooms;
pub mod snapshot;

pub use directory::RoomDirectory;
pub use rooms::{RoomChange, RoomStore, RoomSubscription, RoomWatcher, StoreChange};
pub use snapshot::{JsonFileSnapshot, PersistError, RoomPersistence, SnapshotWriter};
