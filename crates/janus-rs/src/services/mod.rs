//! Runtime services of the data plane.
//!
//! - [`balancer`] - backend selection strategies
//! - [`backend`] - upstream targets with quarantine state
//! - [`route`] - per-vhost admission, queueing, and recheck
//! - [`router`] - vhost routing table and SNI resolution
//! - [`tracker`] - per-vhost counters and latency
//! - [`proxy`] - the admission -> forward -> finalize engine

pub mod backend;
pub mod balancer;
pub mod proxy;
pub mod route;
pub mod router;
pub mod tracker;
