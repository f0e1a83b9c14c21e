//! Observability and Metrics
//!
//! Per-session counters for frame handling, correlation and handshakes.
//!
//! Uses atomic counters so a snapshot can be taken from any task while the
//! session loop keeps running.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Metrics collector for one session client
#[derive(Debug)]
pub struct Metrics {
    /// Transport messages received
    pub frames_received: AtomicU64,
    /// Plaintext control frames received
    pub control_frames: AtomicU64,
    /// Encrypted frames received
    pub encrypted_frames: AtomicU64,
    /// `!<digits>` acknowledgements received
    pub heartbeat_acks: AtomicU64,
    /// `?,,` heartbeats sent
    pub heartbeats_sent: AtomicU64,
    /// Transport messages sent
    pub frames_sent: AtomicU64,
    /// Requests registered with the correlator
    pub requests_issued: AtomicU64,
    /// Responses delivered to a waiting request
    pub responses_matched: AtomicU64,
    /// Responses whose tag matched nothing
    pub unexpected_responses: AtomicU64,
    /// Requests dropped by timeout
    pub requests_expired: AtomicU64,
    /// Frames dropped because they failed to parse, decrypt or decode
    pub decode_failures: AtomicU64,
    /// Integrity failures on incoming frames or pairing secrets
    pub signature_failures: AtomicU64,
    /// Decoded nodes handed to a registered handler
    pub nodes_dispatched: AtomicU64,
    /// Pairing handshakes that established keys
    pub handshakes_success: AtomicU64,
    /// Pairing handshakes that failed
    pub handshakes_failed: AtomicU64,
    /// Challenges answered
    pub challenges_answered: AtomicU64,
    start_time: Instant,
}

macro_rules! counter {
    ($($method:ident => $field:ident),* $(,)?) => {
        $(
            #[inline]
            pub fn $method(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            control_frames: AtomicU64::new(0),
            encrypted_frames: AtomicU64::new(0),
            heartbeat_acks: AtomicU64::new(0),
            heartbeats_sent: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            requests_issued: AtomicU64::new(0),
            responses_matched: AtomicU64::new(0),
            unexpected_responses: AtomicU64::new(0),
            requests_expired: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            signature_failures: AtomicU64::new(0),
            nodes_dispatched: AtomicU64::new(0),
            handshakes_success: AtomicU64::new(0),
            handshakes_failed: AtomicU64::new(0),
            challenges_answered: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    counter! {
        frame_received => frames_received,
        control_frame => control_frames,
        encrypted_frame => encrypted_frames,
        heartbeat_ack => heartbeat_acks,
        heartbeat_sent => heartbeats_sent,
        frame_sent => frames_sent,
        request_issued => requests_issued,
        response_matched => responses_matched,
        unexpected_response => unexpected_responses,
        decode_failure => decode_failures,
        signature_failure => signature_failures,
        node_dispatched => nodes_dispatched,
        handshake_success => handshakes_success,
        handshake_failed => handshakes_failed,
        challenge_answered => challenges_answered,
    }

    /// Record requests dropped by timeout
    pub fn requests_evicted(&self, count: u64) {
        self.requests_expired.fetch_add(count, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            control_frames: self.control_frames.load(Ordering::Relaxed),
            encrypted_frames: self.encrypted_frames.load(Ordering::Relaxed),
            heartbeat_acks: self.heartbeat_acks.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            requests_issued: self.requests_issued.load(Ordering::Relaxed),
            responses_matched: self.responses_matched.load(Ordering::Relaxed),
            unexpected_responses: self.unexpected_responses.load(Ordering::Relaxed),
            requests_expired: self.requests_expired.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            signature_failures: self.signature_failures.load(Ordering::Relaxed),
            nodes_dispatched: self.nodes_dispatched.load(Ordering::Relaxed),
            handshakes_success: self.handshakes_success.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            challenges_answered: self.challenges_answered.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            frames_received = s.frames_received,
            control_frames = s.control_frames,
            encrypted_frames = s.encrypted_frames,
            heartbeat_acks = s.heartbeat_acks,
            heartbeats_sent = s.heartbeats_sent,
            frames_sent = s.frames_sent,
            requests_issued = s.requests_issued,
            responses_matched = s.responses_matched,
            unexpected_responses = s.unexpected_responses,
            requests_expired = s.requests_expired,
            decode_failures = s.decode_failures,
            signature_failures = s.signature_failures,
            nodes_dispatched = s.nodes_dispatched,
            handshakes_success = s.handshakes_success,
            handshakes_failed = s.handshakes_failed,
            challenges_answered = s.challenges_answered,
            uptime_seconds = s.uptime_seconds,
            "Session metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_received: u64,
    pub control_frames: u64,
    pub encrypted_frames: u64,
    pub heartbeat_acks: u64,
    pub heartbeats_sent: u64,
    pub frames_sent: u64,
    pub requests_issued: u64,
    pub responses_matched: u64,
    pub unexpected_responses: u64,
    pub requests_expired: u64,
    pub decode_failures: u64,
    pub signature_failures: u64,
    pub nodes_dispatched: u64,
    pub handshakes_success: u64,
    pub handshakes_failed: u64,
    pub challenges_answered: u64,
    pub uptime_seconds: u64,
}
