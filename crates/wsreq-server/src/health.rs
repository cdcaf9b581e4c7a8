//! `/health` endpoint and the server-wide counters behind it.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Live counters shared by every connection of one server.
#[derive(Debug, Default)]
pub struct ServerCounters {
    connections: AtomicUsize,
    active_requests: AtomicUsize,
}

impl ServerCounters {
    /// Open WebSocket connections.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Handlers currently running.
    pub fn active_requests(&self) -> usize {
        self.active_requests.load(Ordering::Relaxed)
    }

    /// Take a connection slot unless `max` are already in use.
    ///
    /// The check and the increment are one atomic step, so concurrent
    /// upgrades cannot overshoot the limit.
    pub(crate) fn try_reserve_connection(self: &Arc<Self>, max: usize) -> Option<ConnectionSlot> {
        let _ = self
            .connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()?;
        Some(ConnectionSlot {
            counters: Arc::clone(self),
        })
    }

    pub(crate) fn request_started(&self) {
        let _ = self.active_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn request_finished(&self) {
        let _ = self.active_requests.fetch_sub(1, Ordering::Relaxed);
    }
}

/// One reserved connection; the slot is released on drop.
#[derive(Debug)]
pub struct ConnectionSlot {
    counters: Arc<ServerCounters>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        let _ = self.counters.connections.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Current WebSocket connection count.
    pub connections: usize,
    /// Handlers currently running.
    pub active_requests: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, counters: &ServerCounters) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: counters.connections(),
        active_requests: counters.active_requests(),
    }
}
