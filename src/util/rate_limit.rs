//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Max inbound WebSocket messages per second per peer. Player updates at a
/// 50ms send interval plus pings and lobby commands fit well under this.
pub const PEER_MESSAGE_RATE_LIMIT: u32 = 60;

/// Matchmaking join rate limit
pub const MATCHMAKING_RATE_LIMIT: u32 = 5;

/// Per-peer rate limiter state
#[derive(Clone)]
pub struct PeerRateLimiter {
    message_limiter: Arc<Limiter>,
    matchmaking_limiter: Arc<Limiter>,
}

impl PeerRateLimiter {
    pub fn new() -> Self {
        Self {
            message_limiter: create_limiter(PEER_MESSAGE_RATE_LIMIT),
            matchmaking_limiter: create_limiter(MATCHMAKING_RATE_LIMIT),
        }
    }

    /// Check if an inbound message is allowed (returns true if allowed)
    pub fn check_message(&self) -> bool {
        self.message_limiter.check().is_ok()
    }

    /// Check if a matchmaking request is allowed
    pub fn check_matchmaking(&self) -> bool {
        self.matchmaking_limiter.check().is_ok()
    }
}

impl Default for PeerRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matchmaking_burst_is_bounded() {
        let limiter = PeerRateLimiter::new();
        let allowed = (0..20).filter(|_| limiter.check_matchmaking()).count();
        assert_eq!(allowed, MATCHMAKING_RATE_LIMIT as usize);
    }

    #[test]
    fn zero_rate_falls_back_to_one() {
        let limiter = create_limiter(0);
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());
    }
}
