//! Per-peer link quality estimation
//!
//! Latency samples arrive with client pings; the received-update counter is
//! bumped for every `player_update` the server sees and compared against the
//! client's own `sent` counter once per evaluation window.

use std::collections::VecDeque;
use std::time::Duration;

use crate::ws::protocol::QualityReport;

/// Stability below this widens the send interval.
pub const STABILITY_THRESHOLD: f32 = 0.6;
/// Send interval never grows past this multiple of the base.
pub const MAX_INTERVAL_FACTOR: u32 = 4;
pub const BASE_EPSILON: f32 = 0.01;
pub const MAX_EPSILON: f32 = 0.16;

const MAX_LATENCY_SAMPLES: usize = 20;

#[derive(Debug, Clone)]
pub struct LinkQuality {
    latency_samples: VecDeque<f32>,
    /// Updates received from the peer in the current window
    received: u64,
    /// Last cumulative `sent` counter reported by the peer
    reported_sent: u64,
    /// `reported_sent` at the start of the current window
    window_start_sent: u64,
    base_interval: Duration,
    send_interval: Duration,
    epsilon: f32,
}

impl LinkQuality {
    pub fn new(base_interval: Duration) -> Self {
        Self {
            latency_samples: VecDeque::with_capacity(MAX_LATENCY_SAMPLES),
            received: 0,
            reported_sent: 0,
            window_start_sent: 0,
            base_interval,
            send_interval: base_interval,
            epsilon: BASE_EPSILON,
        }
    }

    /// Record a one-way latency estimate in milliseconds.
    pub fn record_latency(&mut self, ms: f32) {
        if !ms.is_finite() || ms < 0.0 {
            return;
        }
        if self.latency_samples.len() == MAX_LATENCY_SAMPLES {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(ms);
    }

    pub fn record_received(&mut self) {
        self.received += 1;
    }

    /// The peer's own count of updates it has sent. Counters never go backwards.
    pub fn record_sent_counter(&mut self, sent: u64) {
        self.reported_sent = self.reported_sent.max(sent);
    }

    /// Most recent one-way latency, zero before any sample.
    pub fn latency_ms(&self) -> f32 {
        self.latency_samples.back().copied().unwrap_or(0.0)
    }

    pub fn send_interval(&self) -> Duration {
        self.send_interval
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    /// Mean absolute delta between consecutive latency samples.
    pub fn jitter_ms(&self) -> f32 {
        if self.latency_samples.len() < 2 {
            return 0.0;
        }
        let deltas: f32 = self
            .latency_samples
            .iter()
            .zip(self.latency_samples.iter().skip(1))
            .map(|(a, b)| (b - a).abs())
            .sum();
        deltas / (self.latency_samples.len() - 1) as f32
    }

    /// `1 - received / sent` over the current window, clamped to 0..=1.
    pub fn packet_loss(&self) -> f32 {
        let sent = self.reported_sent.saturating_sub(self.window_start_sent);
        if sent == 0 {
            return 0.0;
        }
        (1.0 - self.received as f32 / sent as f32).clamp(0.0, 1.0)
    }

    /// Close the current window: score the link, adapt the send interval and
    /// compression epsilon, and start a new window.
    pub fn evaluate(&mut self) -> QualityReport {
        let packet_loss = self.packet_loss();
        let jitter_ms = self.jitter_ms();
        let stability = stability(packet_loss, jitter_ms);

        if stability < STABILITY_THRESHOLD {
            let cap = self.base_interval * MAX_INTERVAL_FACTOR;
            self.send_interval = (self.send_interval * 2).min(cap);
            self.epsilon = (self.epsilon * 2.0).min(MAX_EPSILON);
        } else {
            self.send_interval = self.base_interval;
            self.epsilon = BASE_EPSILON;
        }

        self.received = 0;
        self.window_start_sent = self.reported_sent;

        QualityReport {
            packet_loss,
            jitter_ms,
            stability,
            send_interval_ms: self.send_interval.as_millis() as u64,
            compression_epsilon: self.epsilon,
        }
    }
}

/// Coarse 0..=1 score: `1 - loss*2 - jitter/200`.
pub fn stability(packet_loss: f32, jitter_ms: f32) -> f32 {
    (1.0 - packet_loss * 2.0 - jitter_ms / 200.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(50);

    #[test]
    fn jitter_is_mean_absolute_delta() {
        let mut q = LinkQuality::new(BASE);
        assert_eq!(q.jitter_ms(), 0.0);
        for ms in [10.0, 30.0, 20.0, 20.0] {
            q.record_latency(ms);
        }
        assert!((q.jitter_ms() - 10.0).abs() < 1e-4);
        assert_eq!(q.latency_ms(), 20.0);
    }

    #[test]
    fn loss_compares_reported_and_received() {
        let mut q = LinkQuality::new(BASE);
        q.record_sent_counter(10);
        for _ in 0..8 {
            q.record_received();
        }
        assert!((q.packet_loss() - 0.2).abs() < 1e-4);

        q.evaluate();
        // New window: nothing sent, nothing lost.
        assert_eq!(q.packet_loss(), 0.0);
        q.record_sent_counter(5);
        assert_eq!(q.packet_loss(), 0.0);
    }

    #[test]
    fn poor_link_widens_interval_up_to_cap() {
        let mut q = LinkQuality::new(BASE);
        for _ in 0..4 {
            let sent = q.reported_sent + 10;
            q.record_sent_counter(sent);
            let report = q.evaluate();
            assert!(report.stability < STABILITY_THRESHOLD);
        }
        assert_eq!(q.send_interval(), BASE * MAX_INTERVAL_FACTOR);
        assert_eq!(q.epsilon(), MAX_EPSILON);

        // A clean window restores the base settings.
        let report = q.evaluate();
        assert_eq!(report.stability, 1.0);
        assert_eq!(q.send_interval(), BASE);
        assert_eq!(q.epsilon(), BASE_EPSILON);
    }

    #[test]
    fn stability_is_clamped() {
        assert_eq!(stability(0.0, 0.0), 1.0);
        assert_eq!(stability(1.0, 1000.0), 0.0);
        assert!((stability(0.1, 40.0) - 0.6).abs() < 1e-5);
    }
}
