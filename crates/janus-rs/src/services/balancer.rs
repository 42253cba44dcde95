//! Backend selection strategies.
//!
//! One tagged variant per strategy; any per-strategy state lives in the
//! variant payload. Every pick operates on the live subset of the current
//! backend view, so quarantined backends are invisible to selection.

use crate::models::route::Strategy;
use crate::services::backend::Backend;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Polymorphic backend selector.
///
/// # Contract
///
/// `pick` returns one backend whose quarantine flag is clear, or `None`
/// when every backend is dead. The backend slice is whatever view the
/// owning route currently holds; swapping that view does not reset
/// strategy state.
#[derive(Debug)]
pub enum Balancer {
    /// Circular order over the live set. The counter is kept modulo the
    /// live count at pick time and survives backend churn, which may skew
    /// the first few picks after a change.
    RoundRobin { counter: AtomicUsize },

    /// Uniform pick over the live set.
    Random,

    /// Sticky selection on the client IP. Requests without a client IP
    /// hash as `"0.0.0.0"`. When the chosen backend dies the client is
    /// silently reshuffled onto the remaining live set.
    IpHash,
}

impl Balancer {
    /// Builds the selector for a configured strategy.
    ///
    /// `least_latency` is a reserved tag and selects round-robin behavior
    /// until a latency feedback loop exists.
    pub fn new(strategy: Strategy) -> Self {
        match strategy {
            Strategy::RoundRobin | Strategy::LeastLatency => Balancer::RoundRobin {
                counter: AtomicUsize::new(0),
            },
            Strategy::Random => Balancer::Random,
            Strategy::IpHash => Balancer::IpHash,
        }
    }

    /// Selects one live backend, or `None` when all are quarantined.
    pub fn pick(
        &self,
        backends: &[Arc<Backend>],
        client_ip: Option<&str>,
    ) -> Option<Arc<Backend>> {
        let alive: Vec<&Arc<Backend>> = backends.iter().filter(|b| b.is_alive()).collect();
        if alive.is_empty() {
            return None;
        }

        let index = match self {
            Balancer::RoundRobin { counter } => {
                let n = alive.len();
                let k = counter
                    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |k| Some((k + 1) % n))
                    .unwrap_or(0);
                k % n
            }
            Balancer::Random => {
                use rand::Rng;
                rand::thread_rng().gen_range(0..alive.len())
            }
            Balancer::IpHash => {
                let ip = client_ip.unwrap_or("0.0.0.0");
                hash_client_ip(ip) as usize % alive.len()
            }
        };

        Some(Arc::clone(alive[index]))
    }
}

/// 32-bit multiplicative string mix: `h <- (h << 5) - h + c` per character,
/// folded to 32 bits, then taken as an absolute value.
pub fn hash_client_ip(ip: &str) -> u32 {
    let mut h: i32 = 0;
    for c in ip.chars() {
        h = h.wrapping_shl(5).wrapping_sub(h).wrapping_add(c as i32);
    }
    h.unsigned_abs()
}
