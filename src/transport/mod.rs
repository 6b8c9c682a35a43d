//! Point-to-point delivery of server messages to connected peers
//!
//! Every send is best effort: a peer whose outbound queue is full or closed
//! simply misses the message. Callers that need confirmation layer the
//! reliable event channel on top.

mod hub;

pub use hub::ConnectionHub;

use tracing::debug;

use crate::lobby::room::PeerId;
use crate::ws::protocol::ServerMsg;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Peer {0} is not connected")]
    NotConnected(PeerId),

    #[error("Outbound queue for peer {0} is full")]
    Backpressure(PeerId),

    #[error("Outbound channel for peer {0} is closed")]
    Closed(PeerId),
}

pub trait Transport: Send + Sync {
    /// Deliver one message to one peer.
    fn send_to(&self, peer: &PeerId, msg: ServerMsg) -> Result<(), TransportError>;

    /// Peers currently reachable.
    fn connected_peers(&self) -> Vec<PeerId>;

    /// Deliver to one peer, logging and discarding any failure.
    fn notify(&self, peer: &PeerId, msg: ServerMsg) {
        if let Err(e) = self.send_to(peer, msg) {
            debug!(peer_id = %peer, error = %e, "Dropped outbound message");
        }
    }

    /// Deliver to every listed peer.
    fn notify_all(&self, peers: &[PeerId], msg: &ServerMsg) {
        for peer in peers {
            self.notify(peer, msg.clone());
        }
    }

    /// Deliver to every connected peer.
    fn broadcast(&self, msg: &ServerMsg) {
        for peer in self.connected_peers() {
            self.notify(&peer, msg.clone());
        }
    }
}

#[cfg(test)]
pub mod testing {
    //! Transport double that records every delivered message.

    use std::collections::HashSet;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Clone, Default)]
    pub struct RecordingTransport {
        sent: Arc<Mutex<Vec<(PeerId, ServerMsg)>>>,
        connected: Arc<Mutex<HashSet<PeerId>>>,
    }

    impl RecordingTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn connect(&self, peer: PeerId) {
            self.connected.lock().insert(peer);
        }

        pub fn disconnect(&self, peer: &PeerId) {
            self.connected.lock().remove(peer);
        }

        /// All messages delivered to `peer`, oldest first.
        pub fn sent_to(&self, peer: &PeerId) -> Vec<ServerMsg> {
            self.sent
                .lock()
                .iter()
                .filter(|(p, _)| p == peer)
                .map(|(_, m)| m.clone())
                .collect()
        }

        pub fn count_to<F>(&self, peer: &PeerId, pred: F) -> usize
        where
            F: Fn(&ServerMsg) -> bool,
        {
            self.sent_to(peer).iter().filter(|m| pred(m)).count()
        }

        pub fn clear(&self) {
            self.sent.lock().clear();
        }
    }

    impl Transport for RecordingTransport {
        fn send_to(&self, peer: &PeerId, msg: ServerMsg) -> Result<(), TransportError> {
            if !self.connected.lock().contains(peer) {
                return Err(TransportError::NotConnected(*peer));
            }
            self.sent.lock().push((*peer, msg));
            Ok(())
        }

        fn connected_peers(&self) -> Vec<PeerId> {
            self.connected.lock().iter().copied().collect()
        }
    }
}
