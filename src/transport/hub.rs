//! Registry of connected peers and their outbound queues

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{Transport, TransportError};
use crate::lobby::room::PeerId;
use crate::ws::protocol::ServerMsg;

/// Outbound queue depth per peer. Bounded so a slow client cannot grow
/// server memory without limit.
pub const PEER_QUEUE_CAPACITY: usize = 256;

/// WebSocket-backed transport: one bounded queue per connected peer
pub struct ConnectionHub {
    peers: DashMap<PeerId, mpsc::Sender<ServerMsg>>,
    capacity: usize,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::with_capacity(PEER_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            peers: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Register a peer and return the receiver its writer task drains.
    /// Re-registering replaces (and thereby closes) any previous queue.
    pub fn register(&self, peer: PeerId) -> mpsc::Receiver<ServerMsg> {
        let (tx, rx) = mpsc::channel(self.capacity);
        if self.peers.insert(peer, tx).is_some() {
            warn!(peer_id = %peer, "Peer reconnected, replacing previous connection");
        } else {
            info!(peer_id = %peer, "Peer registered with hub");
        }
        rx
    }

    /// Drop `peer` once its writer has released the receiver. Returns false
    /// when a newer connection for the same peer still owns the slot.
    pub fn release(&self, peer: &PeerId) -> bool {
        self.peers.remove_if(peer, |_, tx| tx.is_closed());
        !self.peers.contains_key(peer)
    }

    pub fn is_connected(&self, peer: &PeerId) -> bool {
        self.peers.contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for ConnectionHub {
    fn send_to(&self, peer: &PeerId, msg: ServerMsg) -> Result<(), TransportError> {
        let sender = self
            .peers
            .get(peer)
            .map(|entry| entry.value().clone())
            .ok_or(TransportError::NotConnected(*peer))?;

        sender.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Backpressure(*peer),
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed(*peer),
        })
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.peers.iter().map(|entry| *entry.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};
    use uuid::Uuid;

    fn pong(t: u64) -> ServerMsg {
        ServerMsg::Pong { t, server_time: 0 }
    }

    #[tokio::test]
    async fn delivers_to_registered_peer() {
        let hub = ConnectionHub::new();
        let peer = Uuid::new_v4();
        let mut rx = hub.register(peer);

        assert_ok!(hub.send_to(&peer, pong(1)));
        assert_eq!(rx.recv().await, Some(pong(1)));
    }

    #[test]
    fn unknown_peer_is_not_connected() {
        let hub = ConnectionHub::new();
        let peer = Uuid::new_v4();
        assert_eq!(hub.send_to(&peer, pong(1)), Err(TransportError::NotConnected(peer)));
    }

    #[test]
    fn full_queue_reports_backpressure() {
        let hub = ConnectionHub::with_capacity(1);
        let peer = Uuid::new_v4();
        let _rx = hub.register(peer);

        assert_ok!(hub.send_to(&peer, pong(1)));
        let err = assert_err!(hub.send_to(&peer, pong(2)));
        assert_eq!(err, TransportError::Backpressure(peer));
    }

    #[test]
    fn dropped_receiver_reports_closed() {
        let hub = ConnectionHub::new();
        let peer = Uuid::new_v4();
        drop(hub.register(peer));
        assert_eq!(hub.send_to(&peer, pong(1)), Err(TransportError::Closed(peer)));
    }

    #[test]
    fn release_keeps_newer_connection() {
        let hub = ConnectionHub::new();
        let peer = Uuid::new_v4();
        let old = hub.register(peer);
        let _new = hub.register(peer);

        drop(old);
        assert!(!hub.release(&peer));
        assert!(hub.is_connected(&peer));

        drop(_new);
        assert!(hub.release(&peer));
        assert!(hub.is_empty());
    }

    #[tokio::test]
    async fn broadcast_swallows_failures() {
        let hub = ConnectionHub::new();
        let alive = Uuid::new_v4();
        let dead = Uuid::new_v4();
        let mut rx = hub.register(alive);
        drop(hub.register(dead));

        hub.broadcast(&pong(5));
        assert_eq!(rx.recv().await, Some(pong(5)));
        assert_eq!(hub.len(), 2);
    }
}
