//! Phoenix heartbeat tracking.
//!
//! The server drops sockets that stay silent past its timeout, so the
//! client sends a `heartbeat` frame every interval and expects a
//! `phx_reply` on the same ref before the next one is due.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Default)]
struct HeartbeatState {
    /// Ref of the heartbeat awaiting its reply.
    pending_ref: Option<u64>,
    last_sent: Option<Instant>,
    last_reply: Option<Instant>,
}

pub struct HeartbeatManager {
    interval: Duration,
    timeout: Duration,
    state: Mutex<HeartbeatState>,
}

impl HeartbeatManager {
    pub fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(timeout_ms),
            state: Mutex::new(HeartbeatState::default()),
        }
    }

    /// Clear state on (re)connect.
    pub fn reset(&self) {
        *self.state.lock() = HeartbeatState::default();
    }

    pub fn record_sent(&self, msg_ref: u64) {
        let mut state = self.state.lock();
        state.pending_ref = Some(msg_ref);
        state.last_sent = Some(Instant::now());
    }

    /// Record a heartbeat reply. Returns false for a stale or unknown ref.
    pub fn record_reply(&self, msg_ref: Option<u64>) -> bool {
        let mut state = self.state.lock();
        if state.pending_ref.is_none() || state.pending_ref != msg_ref {
            return false;
        }
        let now = Instant::now();
        if let Some(sent) = state.last_sent {
            debug!(rtt_ms = now.duration_since(sent).as_millis() as u64, "Heartbeat reply");
        }
        state.pending_ref = None;
        state.last_reply = Some(now);
        true
    }

    /// A heartbeat has been outstanding longer than the timeout.
    pub fn is_timed_out(&self) -> bool {
        let state = self.state.lock();
        match (state.pending_ref, state.last_sent) {
            (Some(_), Some(sent)) => sent.elapsed() > self.timeout,
            _ => false,
        }
    }

    /// Nothing outstanding and a full interval since the last heartbeat.
    pub fn should_send(&self) -> bool {
        let state = self.state.lock();
        if state.pending_ref.is_some() {
            return false;
        }
        state
            .last_sent
            .map_or(true, |sent| sent.elapsed() >= self.interval)
    }
}
