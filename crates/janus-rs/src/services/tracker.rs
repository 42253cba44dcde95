//! Per-vhost request counters and latency tracking.
//!
//! Every operation is a short lock-and-bump over a stats map; nothing here
//! contends with the request path beyond the map lock itself.

use crate::services::proxy::ProxyRequest;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Smoothing factor of the latency moving average.
pub const LATENCY_EWMA_ALPHA: f64 = 0.1;

/// Counters for one virtual host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteStats {
    /// Requests that became active (forwarded at least once).
    pub requests_total: u64,
    /// Requests currently in flight.
    pub requests_active: u64,
    /// Failed requests plus shed requests.
    pub errors_total: u64,
    /// Exponentially weighted moving average of request latency.
    pub avg_latency_ms: f64,
}

/// Per-vhost stats store.
#[derive(Debug, Default)]
pub struct Tracker {
    stats: RwLock<HashMap<String, RouteStats>>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a request entering the forward path.
    pub fn on_start(&self, vhost: &str) {
        let mut stats = self.stats.write().unwrap();
        let entry = stats.entry(vhost.to_string()).or_default();
        entry.requests_total += 1;
        entry.requests_active += 1;
    }

    /// Records a terminal edge of an active request: decrements the active
    /// gauge (floored at zero), counts an error when the request did not
    /// succeed, and folds the observed latency into the moving average.
    pub fn on_end(&self, request: &ProxyRequest, success: bool) {
        let elapsed_ms = request.start.elapsed().as_millis() as f64;
        let mut stats = self.stats.write().unwrap();
        let entry = stats.entry(request.vhost.clone()).or_default();
        entry.requests_active = entry.requests_active.saturating_sub(1);
        if !success {
            entry.errors_total += 1;
        }
        entry.avg_latency_ms =
            (1.0 - LATENCY_EWMA_ALPHA) * entry.avg_latency_ms + LATENCY_EWMA_ALPHA * elapsed_ms;
    }

    /// Records an error that never became an active request. The code is a
    /// log field only; it is not kept per code.
    pub fn on_error(&self, vhost: &str, code: &str) {
        warn!("vhost {}: request rejected ({})", vhost, code);
        let mut stats = self.stats.write().unwrap();
        stats.entry(vhost.to_string()).or_default().errors_total += 1;
    }

    /// Drops the entry for a vhost; used when its route is deleted.
    pub fn remove(&self, vhost: &str) {
        self.stats.write().unwrap().remove(vhost);
    }

    /// Snapshot of every vhost's counters.
    pub fn snapshot(&self) -> HashMap<String, RouteStats> {
        self.stats.read().unwrap().clone()
    }

    /// Snapshot of one vhost's counters.
    pub fn snapshot_for(&self, vhost: &str) -> Option<RouteStats> {
        self.stats.read().unwrap().get(vhost).cloned()
    }
}
