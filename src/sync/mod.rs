//! In-round synchronization: state replication, link quality and
//! acknowledged delivery

pub mod quality;
pub mod reliable;
pub mod replicator;

pub use quality::LinkQuality;
pub use reliable::{DeliveryError, DeliveryReceipt, InboundDedup, ReliableChannel};
pub use replicator::{interpolate, reconcile, HistoryEntry, Replicator};
