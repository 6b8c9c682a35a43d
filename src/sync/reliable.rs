//! Acknowledged delivery over the best-effort transport
//!
//! An event is transmitted once, then resent on every retry timer until the
//! target acks it. After `max_retries` resends the next timer gives up: the
//! entry is dropped and its receipt resolves with an error exactly once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::lobby::room::PeerId;
use crate::transport::Transport;
use crate::util::tasks::{Fired, ScheduledTasks};
use crate::util::time::unix_millis;
use crate::ws::protocol::{EventId, ReliableEvent, ReliablePayload, ServerMsg};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("Event {event_id} was not acknowledged after {attempts} attempts")]
    RetriesExhausted { event_id: EventId, attempts: u32 },

    #[error("Peer {0} disconnected before acknowledging")]
    PeerDisconnected(PeerId),
}

impl DeliveryError {
    pub fn reason(&self) -> &'static str {
        match self {
            DeliveryError::RetriesExhausted { .. } => "retries_exhausted",
            DeliveryError::PeerDisconnected(_) => "peer_disconnected",
        }
    }
}

/// Resolves once the event is acknowledged or abandoned.
pub type DeliveryReceipt = oneshot::Receiver<Result<(), DeliveryError>>;

struct Pending {
    event: ReliableEvent,
    sent_at: Instant,
    retry_count: u32,
    receipt: Option<oneshot::Sender<Result<(), DeliveryError>>>,
}

impl Pending {
    fn resolve(&mut self, outcome: Result<(), DeliveryError>) {
        if let Some(tx) = self.receipt.take() {
            // Receipt holder may have stopped listening.
            let _ = tx.send(outcome);
        }
    }
}

pub struct ReliableChannel {
    transport: Arc<dyn Transport>,
    pending: HashMap<EventId, Pending>,
    retries: ScheduledTasks<EventId>,
    next_id: EventId,
    retry_interval: Duration,
    max_retries: u32,
}

impl ReliableChannel {
    pub fn new(
        transport: Arc<dyn Transport>,
        retries: ScheduledTasks<EventId>,
        retry_interval: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            transport,
            pending: HashMap::new(),
            retries,
            next_id: 1,
            retry_interval,
            max_retries,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: EventId) -> bool {
        self.pending.contains_key(&id)
    }

    /// Transmit `payload` to `target` and track it until acknowledged.
    pub fn send_reliable(
        &mut self,
        source: Option<PeerId>,
        target: PeerId,
        payload: ReliablePayload,
    ) -> (EventId, DeliveryReceipt) {
        let id = self.next_id;
        self.next_id += 1;

        let event = ReliableEvent {
            id,
            source,
            target,
            payload,
            timestamp: unix_millis(),
        };
        let (tx, rx) = oneshot::channel();

        self.transmit(&event);
        self.retries.schedule(id, self.retry_interval);
        self.pending.insert(
            id,
            Pending {
                event,
                sent_at: Instant::now(),
                retry_count: 0,
                receipt: Some(tx),
            },
        );

        (id, rx)
    }

    /// Handle a retry timer: resend, or give up once retries are spent.
    pub fn on_retry(&mut self, fired: &Fired<EventId>) {
        if !self.retries.accept(fired) {
            return;
        }
        let id = fired.key;
        let Some(entry) = self.pending.get_mut(&id) else {
            return;
        };

        if entry.retry_count < self.max_retries {
            entry.retry_count += 1;
            debug!(
                event_id = id,
                target_id = %entry.event.target,
                attempt = entry.retry_count,
                kind = entry.event.payload.kind(),
                "Resending reliable event"
            );
            let event = entry.event.clone();
            self.transmit(&event);
            self.retries.schedule(id, self.retry_interval);
            return;
        }

        if let Some(mut entry) = self.pending.remove(&id) {
            let error = DeliveryError::RetriesExhausted {
                event_id: id,
                attempts: entry.retry_count + 1,
            };
            warn!(
                event_id = id,
                target_id = %entry.event.target,
                elapsed_ms = entry.sent_at.elapsed().as_millis() as u64,
                "Reliable event delivery failed"
            );
            self.report_failure(&entry.event, &error);
            entry.resolve(Err(error));
        }
    }

    /// Acknowledgement from `from`. Only the event's target may ack it.
    pub fn on_ack(&mut self, from: PeerId, id: EventId) -> bool {
        match self.pending.get(&id) {
            Some(entry) if entry.event.target == from => {}
            _ => return false,
        }

        self.retries.cancel(&id);
        if let Some(mut entry) = self.pending.remove(&id) {
            debug!(event_id = id, retries = entry.retry_count, "Reliable event acknowledged");
            entry.resolve(Ok(()));
        }
        true
    }

    /// Abandon every event addressed to `peer`. Returns how many were pending.
    pub fn release_peer(&mut self, peer: &PeerId) -> usize {
        let ids: Vec<EventId> = self
            .pending
            .iter()
            .filter(|(_, p)| &p.event.target == peer)
            .map(|(id, _)| *id)
            .collect();

        for id in &ids {
            self.retries.cancel(id);
            if let Some(mut entry) = self.pending.remove(id) {
                entry.resolve(Err(DeliveryError::PeerDisconnected(*peer)));
            }
        }

        if !ids.is_empty() {
            debug!(peer_id = %peer, released = ids.len(), "Released pending reliable events");
        }
        ids.len()
    }

    fn transmit(&self, event: &ReliableEvent) {
        self.transport.notify(
            &event.target,
            ServerMsg::Reliable {
                event: event.clone(),
            },
        );
    }

    fn report_failure(&self, event: &ReliableEvent, error: &DeliveryError) {
        if let Some(source) = event.source {
            self.transport.notify(
                &source,
                ServerMsg::DeliveryFailed {
                    event_id: event.id,
                    target_id: event.target,
                    reason: error.reason().to_string(),
                },
            );
        }
    }
}

/// Remembers recent `(source, client event id)` pairs so retried client
/// events are applied once.
pub struct InboundDedup {
    capacity: usize,
    order: VecDeque<(PeerId, EventId)>,
    seen: HashSet<(PeerId, EventId)>,
}

impl InboundDedup {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// True the first time a pair is seen.
    pub fn first_sighting(&mut self, source: PeerId, id: EventId) -> bool {
        if !self.seen.insert((source, id)) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back((source, id));
        true
    }

    pub fn forget_source(&mut self, source: &PeerId) {
        self.order.retain(|(s, _)| s != source);
        self.seen.retain(|(s, _)| s != source);
    }
}

impl Default for InboundDedup {
    fn default() -> Self {
        Self::new(256)
    }
}
