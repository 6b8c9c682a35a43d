//! Player state replication between room members
//!
//! Each published [`MotionState`] is stamped with a per-sender sequence and
//! the receive time, kept in a bounded history for lag-compensated lookups,
//! and relayed to the other members as a [`MotionPatch`] holding only the
//! fields that changed on that sender → receiver channel.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::quality::LinkQuality;
use crate::lobby::room::PeerId;
use crate::transport::Transport;
use crate::ws::protocol::{MotionPatch, MotionState, QualityReport, ServerMsg};

/// Positions closer than this are treated as agreeing.
pub const SNAP_THRESHOLD: f32 = 5.0;
/// Fraction of the error corrected per reconcile step.
pub const RECONCILE_BLEND: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryEntry {
    pub seq: u64,
    /// Unix millis at which the server received the state
    pub timestamp: u64,
    pub state: MotionState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Published {
    pub seq: u64,
    /// Receivers that were sent a patch
    pub relayed: usize,
}

/// Newest state held back by the throttle, relayed once the interval passes
struct PendingRelay {
    seq: u64,
    timestamp: u64,
    state: MotionState,
    receivers: Vec<PeerId>,
}

struct Track {
    next_seq: u64,
    history: VecDeque<HistoryEntry>,
    last_relay_at: Option<u64>,
    pending: Option<PendingRelay>,
}

impl Track {
    fn new(capacity: usize) -> Self {
        Self {
            next_seq: 1,
            history: VecDeque::with_capacity(capacity),
            last_relay_at: None,
            pending: None,
        }
    }
}

pub struct Replicator {
    transport: Arc<dyn Transport>,
    history_capacity: usize,
    base_interval: Duration,
    tracks: HashMap<PeerId, Track>,
    /// Last state sent per (sender, receiver) channel
    sent_cache: HashMap<(PeerId, PeerId), MotionState>,
    links: HashMap<PeerId, LinkQuality>,
}

impl Replicator {
    pub fn new(
        transport: Arc<dyn Transport>,
        history_capacity: usize,
        base_interval: Duration,
    ) -> Self {
        Self {
            transport,
            history_capacity: history_capacity.max(1),
            base_interval,
            tracks: HashMap::new(),
            sent_cache: HashMap::new(),
            links: HashMap::new(),
        }
    }

    /// Stamp, record and relay a state published by `sender` to `receivers`.
    ///
    /// While the sender is inside its current send interval the state is
    /// held as pending instead of relayed, replacing any older pending state.
    /// Sequence and history advance regardless.
    pub fn publish(
        &mut self,
        sender: PeerId,
        receivers: &[PeerId],
        state: MotionState,
        received_at: u64,
    ) -> Published {
        let interval = self.link_mut(sender).send_interval().as_millis() as u64;
        self.link_mut(sender).record_received();

        let capacity = self.history_capacity;
        let track = self.tracks.entry(sender).or_insert_with(|| Track::new(capacity));
        let seq = track.next_seq;
        track.next_seq += 1;

        if track.history.len() == capacity {
            track.history.pop_front();
        }
        track.history.push_back(HistoryEntry {
            seq,
            timestamp: received_at,
            state,
        });

        let throttled = track
            .last_relay_at
            .is_some_and(|last| received_at.saturating_sub(last) < interval);
        if throttled {
            track.pending = Some(PendingRelay {
                seq,
                timestamp: received_at,
                state,
                receivers: receivers.to_vec(),
            });
            return Published { seq, relayed: 0 };
        }
        track.last_relay_at = Some(received_at);
        track.pending = None;

        let relayed = self.relay(sender, receivers, seq, received_at, &state);
        Published { seq, relayed }
    }

    /// Relay every pending state whose sender's interval has elapsed by
    /// `now`. Returns the number of patches sent.
    pub fn flush_due(&mut self, now: u64) -> usize {
        let due: Vec<PeerId> = self
            .tracks
            .iter()
            .filter(|(peer, track)| {
                let interval = self
                    .links
                    .get(*peer)
                    .map_or(self.base_interval, LinkQuality::send_interval)
                    .as_millis() as u64;
                track.pending.is_some()
                    && track
                        .last_relay_at
                        .map_or(true, |last| now.saturating_sub(last) >= interval)
            })
            .map(|(peer, _)| *peer)
            .collect();

        let mut relayed = 0;
        for sender in due {
            let Some(track) = self.tracks.get_mut(&sender) else {
                continue;
            };
            let Some(pending) = track.pending.take() else {
                continue;
            };
            track.last_relay_at = Some(now);
            relayed += self.relay(
                sender,
                &pending.receivers,
                pending.seq,
                pending.timestamp,
                &pending.state,
            );
        }
        relayed
    }

    fn relay(
        &mut self,
        sender: PeerId,
        receivers: &[PeerId],
        seq: u64,
        timestamp: u64,
        state: &MotionState,
    ) -> usize {
        let mut relayed = 0;
        for receiver in receivers.iter().filter(|r| **r != sender) {
            let patch = self.compress(sender, *receiver, state);
            if patch.is_empty() {
                continue;
            }
            self.transport.notify(
                receiver,
                ServerMsg::PlayerUpdate {
                    player_id: sender,
                    seq,
                    timestamp,
                    patch,
                },
            );
            relayed += 1;
        }
        relayed
    }

    /// Diff `state` against what was last sent on the sender → receiver
    /// channel, using the receiver's current epsilon for float fields. The
    /// cache is updated to the full state.
    pub fn compress(
        &mut self,
        sender: PeerId,
        receiver: PeerId,
        state: &MotionState,
    ) -> MotionPatch {
        let epsilon = self
            .links
            .get(&receiver)
            .map_or(super::quality::BASE_EPSILON, LinkQuality::epsilon);
        let previous = self.sent_cache.insert((sender, receiver), *state);

        let Some(prev) = previous else {
            return full_patch(state);
        };

        let changed = |a: f32, b: f32| (a - b).abs() > epsilon;
        MotionPatch {
            x: changed(prev.x, state.x).then_some(state.x),
            y: changed(prev.y, state.y).then_some(state.y),
            angle: changed(prev.angle, state.angle).then_some(state.angle),
            vx: changed(prev.vx, state.vx).then_some(state.vx),
            vy: changed(prev.vy, state.vy).then_some(state.vy),
            health: changed(prev.health, state.health).then_some(state.health),
            shooting: (prev.shooting != state.shooting).then_some(state.shooting),
        }
    }

    /// Newest entry at or before `at_time` minus the peer's latency.
    pub fn rewind(&self, peer: &PeerId, at_time: u64) -> Option<&HistoryEntry> {
        let latency = self.links.get(peer).map_or(0.0, LinkQuality::latency_ms);
        let target = at_time.saturating_sub(latency.round() as u64);

        self.tracks
            .get(peer)?
            .history
            .iter()
            .rev()
            .find(|entry| entry.timestamp <= target)
    }

    pub fn history_len(&self, peer: &PeerId) -> usize {
        self.tracks.get(peer).map_or(0, |t| t.history.len())
    }

    /// Fold a client ping into the peer's link estimate. `rtt_ms` is halved
    /// into a one-way latency.
    pub fn record_ping(&mut self, peer: PeerId, rtt_ms: Option<u32>, sent: Option<u64>) {
        let link = self.link_mut(peer);
        if let Some(rtt) = rtt_ms {
            link.record_latency(rtt as f32 / 2.0);
        }
        if let Some(sent) = sent {
            link.record_sent_counter(sent);
        }
    }

    pub fn link(&self, peer: &PeerId) -> Option<&LinkQuality> {
        self.links.get(peer)
    }

    /// Evaluate every tracked link and send each peer its report.
    pub fn evaluate_quality(&mut self) -> Vec<(PeerId, QualityReport)> {
        let mut reports = Vec::with_capacity(self.links.len());
        for (peer, link) in self.links.iter_mut() {
            let report = link.evaluate();
            debug!(
                peer_id = %peer,
                stability = report.stability,
                packet_loss = report.packet_loss,
                jitter_ms = report.jitter_ms,
                send_interval_ms = report.send_interval_ms,
                "Network quality"
            );
            self.transport.notify(peer, ServerMsg::NetworkQuality { report });
            reports.push((*peer, report));
        }
        reports
    }

    /// Drop history, channel caches and link state held for `peer`.
    pub fn forget(&mut self, peer: &PeerId) {
        self.tracks.remove(peer);
        self.links.remove(peer);
        self.sent_cache
            .retain(|(sender, receiver), _| sender != peer && receiver != peer);
    }

    /// Forget channels between `peer` and everyone else, so the next relay in
    /// either direction carries full state. Used when room membership changes.
    pub fn reset_channels(&mut self, peer: &PeerId) {
        self.sent_cache
            .retain(|(sender, receiver), _| sender != peer && receiver != peer);
    }

    fn link_mut(&mut self, peer: PeerId) -> &mut LinkQuality {
        let base = self.base_interval;
        self.links.entry(peer).or_insert_with(|| LinkQuality::new(base))
    }
}

fn full_patch(state: &MotionState) -> MotionPatch {
    MotionPatch {
        x: Some(state.x),
        y: Some(state.y),
        angle: Some(state.angle),
        vx: Some(state.vx),
        vy: Some(state.vy),
        health: Some(state.health),
        shooting: Some(state.shooting),
    }
}

/// Linear blend of position and velocity; `t` is clamped to 0..=1. Discrete
/// fields come from `to` once `t` reaches the midpoint.
pub fn interpolate(from: &MotionState, to: &MotionState, t: f32) -> MotionState {
    let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
    let lerp = |a: f32, b: f32| a + (b - a) * t;
    let late = if t >= 0.5 { to } else { from };

    MotionState {
        x: lerp(from.x, to.x),
        y: lerp(from.y, to.y),
        angle: late.angle,
        vx: lerp(from.vx, to.vx),
        vy: lerp(from.vy, to.vy),
        health: late.health,
        shooting: late.shooting,
    }
}

/// Pull a locally predicted state toward the authoritative one, only when
/// they disagree by more than [`SNAP_THRESHOLD`].
pub fn reconcile(predicted: &MotionState, authoritative: &MotionState) -> MotionState {
    let dx = authoritative.x - predicted.x;
    let dy = authoritative.y - predicted.y;
    if (dx * dx + dy * dy).sqrt() <= SNAP_THRESHOLD {
        return *predicted;
    }
    interpolate(predicted, authoritative, RECONCILE_BLEND)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::RecordingTransport;
    use uuid::Uuid;

    fn peer(n: u128) -> PeerId {
        Uuid::from_u128(n)
    }

    fn state(x: f32) -> MotionState {
        MotionState {
            x,
            health: 100.0,
            ..MotionState::default()
        }
    }

    fn setup(capacity: usize) -> (Replicator, RecordingTransport) {
        let transport = RecordingTransport::new();
        for n in 1..=3 {
            transport.connect(peer(n));
        }
        let replicator =
            Replicator::new(Arc::new(transport.clone()), capacity, Duration::from_millis(50));
        (replicator, transport)
    }

    fn patches_to(transport: &RecordingTransport, receiver: PeerId) -> Vec<(u64, MotionPatch)> {
        transport
            .sent_to(&receiver)
            .into_iter()
            .filter_map(|m| match m {
                ServerMsg::PlayerUpdate { seq, patch, .. } => Some((seq, patch)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn sequence_is_monotonic_per_sender() {
        let (mut r, _) = setup(10);
        let members = [peer(1), peer(2)];
        let seqs: Vec<u64> = (0..5)
            .map(|i| r.publish(peer(1), &members, state(i as f32), 1_000 + i * 100).seq)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        assert_eq!(r.publish(peer(2), &members, state(0.0), 2_000).seq, 1);
    }

    #[test]
    fn first_send_is_full_then_deltas() {
        let (mut r, transport) = setup(10);
        let members = [peer(1), peer(2)];
        r.publish(peer(1), &members, state(1.0), 1_000);
        r.publish(peer(1), &members, state(2.0), 1_100);
        r.publish(peer(1), &members, state(2.0), 1_200);

        let patches = patches_to(&transport, peer(2));
        assert_eq!(patches.len(), 2);
        assert!(patches[0].1.health.is_some() && patches[0].1.shooting.is_some());
        assert_eq!(
            patches[1].1,
            MotionPatch {
                x: Some(2.0),
                ..MotionPatch::default()
            }
        );
        assert!(patches_to(&transport, peer(1)).is_empty());
    }

    #[test]
    fn changes_within_epsilon_are_suppressed() {
        let (mut r, _) = setup(10);
        r.compress(peer(1), peer(2), &state(1.0));
        let patch = r.compress(peer(1), peer(2), &state(1.005));
        assert!(patch.is_empty());
    }

    #[test]
    fn relay_is_throttled_by_send_interval() {
        let (mut r, transport) = setup(10);
        let members = [peer(1), peer(2)];
        assert_eq!(r.publish(peer(1), &members, state(1.0), 1_000).relayed, 1);
        assert_eq!(r.publish(peer(1), &members, state(2.0), 1_020).relayed, 0);
        assert_eq!(r.publish(peer(1), &members, state(3.0), 1_060).relayed, 1);

        let patches = patches_to(&transport, peer(2));
        assert_eq!(patches.iter().map(|(s, _)| *s).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(r.history_len(&peer(1)), 3);
    }

    #[test]
    fn throttled_state_is_flushed_once_interval_elapses() {
        let (mut r, transport) = setup(10);
        let members = [peer(1), peer(2)];
        r.publish(peer(1), &members, state(1.0), 1_000);
        r.publish(peer(1), &members, state(2.0), 1_020);

        assert_eq!(r.flush_due(1_030), 0);
        assert_eq!(r.flush_due(1_050), 1);
        assert_eq!(r.flush_due(1_200), 0);

        let patches = patches_to(&transport, peer(2));
        assert_eq!(patches.last().map(|(seq, p)| (*seq, p.x)), Some((2, Some(2.0))));
    }

    #[test]
    fn fresh_relay_supersedes_pending_state() {
        let (mut r, transport) = setup(10);
        let members = [peer(1), peer(2)];
        r.publish(peer(1), &members, state(1.0), 1_000);
        r.publish(peer(1), &members, state(2.0), 1_020);
        r.publish(peer(1), &members, state(3.0), 1_060);

        assert_eq!(r.flush_due(2_000), 0);
        let seqs: Vec<u64> = patches_to(&transport, peer(2)).iter().map(|(s, _)| *s).collect();
        assert_eq!(seqs, vec![1, 3]);
    }

    #[test]
    fn history_is_bounded() {
        let (mut r, _) = setup(3);
        for i in 0..10u64 {
            r.publish(peer(1), &[], state(i as f32), 1_000 + i * 100);
        }
        assert_eq!(r.history_len(&peer(1)), 3);
        assert!(r.rewind(&peer(1), 1_000).is_none());
        assert_eq!(r.rewind(&peer(1), 10_000).map(|e| e.seq), Some(10));
    }

    #[test]
    fn rewind_subtracts_latency() {
        let (mut r, _) = setup(10);
        for i in 0..5u64 {
            r.publish(peer(1), &[], state(i as f32), 1_000 + i * 100);
        }
        assert_eq!(r.rewind(&peer(1), 1_250).map(|e| e.timestamp), Some(1_200));

        // 200ms round trip, 100ms one way.
        r.record_ping(peer(1), Some(200), None);
        assert_eq!(r.rewind(&peer(1), 1_250).map(|e| e.timestamp), Some(1_100));
        assert!(r.rewind(&peer(1), 1_050).is_none());
        assert!(r.rewind(&peer(3), 5_000).is_none());
    }

    #[test]
    fn forget_clears_everything() {
        let (mut r, _) = setup(10);
        r.publish(peer(1), &[peer(1), peer(2)], state(1.0), 1_000);
        r.forget(&peer(1));
        assert_eq!(r.history_len(&peer(1)), 0);
        assert!(r.link(&peer(1)).is_none());

        let patch = r.compress(peer(1), peer(2), &state(1.0));
        assert_eq!(patch, full_patch(&state(1.0)));
    }

    #[test]
    fn quality_reports_reach_peers() {
        let (mut r, transport) = setup(10);
        r.record_ping(peer(1), Some(40), Some(0));
        let reports = r.evaluate_quality();
        assert_eq!(reports.len(), 1);
        assert_eq!(
            transport.count_to(&peer(1), |m| matches!(m, ServerMsg::NetworkQuality { .. })),
            1
        );
    }

    #[test]
    fn interpolate_clamps_t() {
        let a = state(0.0);
        let b = state(10.0);
        assert_eq!(interpolate(&a, &b, 0.5).x, 5.0);
        assert_eq!(interpolate(&a, &b, -1.0).x, 0.0);
        assert_eq!(interpolate(&a, &b, 7.0).x, 10.0);
        assert_eq!(interpolate(&a, &b, f32::NAN).x, 0.0);
    }

    #[test]
    fn reconcile_only_past_threshold() {
        let predicted = state(0.0);
        assert_eq!(reconcile(&predicted, &state(2.0)), predicted);

        let corrected = reconcile(&predicted, &state(100.0));
        assert!((corrected.x - 100.0 * RECONCILE_BLEND).abs() < 1e-4);
    }
}
