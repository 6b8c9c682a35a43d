//! Guest session tokens
//!
//! Without a JWT secret every connection is a guest. Each guest is handed an
//! opaque random token in its `welcome`; presenting that token again resumes
//! the same peer id. Peer ids are public (they appear in every room update)
//! and are never accepted as credentials.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::{rngs::OsRng, RngCore};
use tracing::debug;
use uuid::Uuid;

use crate::lobby::room::PeerId;

/// Sessions idle longer than this are dropped once their peer is gone.
pub const GUEST_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

const TOKEN_BYTES: usize = 32;

struct GuestSession {
    peer_id: PeerId,
    last_seen: Instant,
}

pub struct GuestSessions {
    sessions: DashMap<String, GuestSession>,
    ttl: Duration,
}

impl GuestSessions {
    pub fn new() -> Self {
        Self::with_ttl(GUEST_SESSION_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    /// Mint a fresh peer id and the token that resumes it.
    pub fn issue(&self) -> (PeerId, String) {
        let peer_id = Uuid::new_v4();
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        self.sessions.insert(
            token.clone(),
            GuestSession {
                peer_id,
                last_seen: Instant::now(),
            },
        );
        debug!(peer_id = %peer_id, "Guest session issued");
        (peer_id, token)
    }

    /// Peer behind `token`, refreshing its idle clock.
    pub fn resume(&self, token: &str) -> Option<PeerId> {
        let mut session = self.sessions.get_mut(token)?;
        session.last_seen = Instant::now();
        Some(session.peer_id)
    }

    /// Forget idle sessions whose peer `is_live` no longer reports as
    /// connected. Returns how many were dropped.
    pub fn prune(&self, is_live: impl Fn(&PeerId) -> bool) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, s| is_live(&s.peer_id) || s.last_seen.elapsed() < self.ttl);
        let dropped = before.saturating_sub(self.sessions.len());
        if dropped > 0 {
            debug!(dropped, "Pruned idle guest sessions");
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for GuestSessions {
    fn default() -> Self {
        Self::new()
    }
}
