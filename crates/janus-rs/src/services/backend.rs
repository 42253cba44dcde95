//! Runtime state of one upstream target.
//!
//! A backend accumulates failure credit from the forward path; crossing the
//! quarantine threshold removes it from selection until the owning route's
//! periodic recheck observes it answering again.

use crate::models::route::BackendConfig;
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

/// Consecutive failures after which a backend is quarantined.
pub const QUARANTINE_THRESHOLD: u32 = 3;

/// One upstream target with live health state.
///
/// Identity is immutable after construction; only the owning route mutates
/// the health fields (failure credit from the forward path, restore from
/// the recheck loop).
///
/// # Invariants
///
/// - quarantined implies `dead_since` is set
/// - a live backend has fewer than [`QUARANTINE_THRESHOLD`] failures
#[derive(Debug)]
pub struct Backend {
    /// Stable identifier, unique within the route.
    pub id: String,
    /// Bare upstream hostname or IP.
    pub host: String,
    /// Upstream port.
    pub port: u16,
    /// Reserved for weighted balancing; carried but unused.
    pub weight: u32,

    is_dead: AtomicBool,
    failure_count: AtomicU32,
    dead_since: RwLock<Option<DateTime<Utc>>>,
}

impl Backend {
    pub fn from_config(config: &BackendConfig) -> Arc<Self> {
        Arc::new(Self {
            id: config.id.clone(),
            host: config.host.clone(),
            port: config.port,
            weight: config.weight,
            is_dead: AtomicBool::new(false),
            failure_count: AtomicU32::new(0),
            dead_since: RwLock::new(None),
        })
    }

    /// Whether the backend is eligible for selection.
    pub fn is_alive(&self) -> bool {
        !self.is_dead.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Wall-clock instant of the transition into quarantine, if any.
    pub fn dead_since(&self) -> Option<DateTime<Utc>> {
        *self.dead_since.read().unwrap()
    }

    /// Credits one failure. Crossing the threshold quarantines the backend
    /// and stamps `dead_since` once; further failures keep incrementing the
    /// counter without touching the stamp.
    ///
    /// # Returns
    ///
    /// `true` on the transition into quarantine.
    pub fn record_failure(&self) -> bool {
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= QUARANTINE_THRESHOLD && !self.is_dead.swap(true, Ordering::Relaxed) {
            *self.dead_since.write().unwrap() = Some(Utc::now());
            warn!(
                "backend {} ({}:{}) quarantined after {} failures",
                self.id, self.host, self.port, failures
            );
            return true;
        }
        false
    }

    /// Lifts the quarantine and clears the failure accounting.
    pub fn restore(&self) {
        self.is_dead.store(false, Ordering::Relaxed);
        self.failure_count.store(0, Ordering::Relaxed);
        *self.dead_since.write().unwrap() = None;
        info!("backend {} ({}:{}) restored", self.id, self.host, self.port);
    }
}
