//! Runtime mirror of one route configuration.
//!
//! The route is the synchronization unit of the data plane: one mutex
//! covers the active counter and the FIFO queue, and the admission decision
//! happens entirely inside it. Backends and config sit behind read-write
//! locks and are swapped wholesale when the control plane replaces the
//! configuration; in-flight requests keep the backend they were assigned.

use crate::models::route::RouteConfig;
use crate::services::backend::Backend;
use crate::services::balancer::Balancer;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Interval between probes of quarantined backends.
pub const QUARANTINE_RECHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Per-probe timeout for the quarantine recheck GET.
pub const QUARANTINE_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of the admission decision for one arriving request.
pub enum Admission {
    /// A slot in the active budget was reserved; forward now.
    Admitted,
    /// The request was parked; the receiver resolves once the queue pump
    /// grants it a slot. A dropped sender means the route went away.
    Queued(oneshot::Receiver<()>),
    /// Active budget and queue are both exhausted; shed the request.
    Rejected,
}

struct AdmissionState {
    active: usize,
    queue: VecDeque<oneshot::Sender<()>>,
}

/// One virtual host at runtime.
pub struct Route {
    config: RwLock<RouteConfig>,
    backends: RwLock<Vec<Arc<Backend>>>,
    balancer: RwLock<Balancer>,
    admission: Mutex<AdmissionState>,
    recheck: Mutex<Option<JoinHandle<()>>>,
}

impl Route {
    /// Builds the runtime route for a configuration. The quarantine recheck
    /// loop is not started here; callers that own a runtime attach it with
    /// [`Route::start_recheck`].
    pub fn new(config: RouteConfig) -> Arc<Self> {
        let backends = config.backends.iter().map(Backend::from_config).collect();
        let balancer = Balancer::new(config.strategy);
        Arc::new(Self {
            config: RwLock::new(config),
            backends: RwLock::new(backends),
            balancer: RwLock::new(balancer),
            admission: Mutex::new(AdmissionState {
                active: 0,
                queue: VecDeque::new(),
            }),
            recheck: Mutex::new(None),
        })
    }

    /// The canonical virtual-host key this route serves.
    pub fn vhost(&self) -> String {
        self.config.read().unwrap().vhost.clone()
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> RouteConfig {
        self.config.read().unwrap().clone()
    }

    /// Current view of the backend set.
    pub fn backends(&self) -> Vec<Arc<Backend>> {
        self.backends.read().unwrap().clone()
    }

    /// Whether the active budget has room.
    pub fn can_handle(&self) -> bool {
        let state = self.admission.lock().unwrap();
        state.active < self.max_active()
    }

    /// Whether the queue has room.
    pub fn can_queue(&self) -> bool {
        let state = self.admission.lock().unwrap();
        state.queue.len() < self.max_queued()
    }

    pub fn active_count(&self) -> usize {
        self.admission.lock().unwrap().active
    }

    pub fn queue_len(&self) -> usize {
        self.admission.lock().unwrap().queue.len()
    }

    /// The admission decision: forward now, park in FIFO order, or shed.
    ///
    /// The whole decision is one atomic region under the admission mutex;
    /// a reserved slot is counted in `active` before the lock is released,
    /// so `active` never exceeds `max_active` observably.
    pub fn try_admit(&self) -> Admission {
        let mut state = self.admission.lock().unwrap();
        if state.active < self.max_active() {
            state.active += 1;
            Admission::Admitted
        } else if state.queue.len() < self.max_queued() {
            let (tx, rx) = oneshot::channel();
            state.queue.push_back(tx);
            Admission::Queued(rx)
        } else {
            Admission::Rejected
        }
    }

    /// Returns one reserved slot, flooring at zero.
    pub fn release_slot(&self) {
        let mut state = self.admission.lock().unwrap();
        state.active = state.active.saturating_sub(1);
    }

    /// Grants queued requests while the active budget has room.
    ///
    /// Each grant reserves the slot before waking the waiter, and the
    /// waiter resumes on its own scheduler turn, preserving FIFO order
    /// without growing the stack across many simultaneous completions.
    /// Grants whose waiter vanished (the client hung up while queued) are
    /// rolled back and the next waiter is tried.
    pub fn pump(&self) {
        let mut state = self.admission.lock().unwrap();
        let max_active = self.max_active();
        while state.active < max_active {
            let Some(tx) = state.queue.pop_front() else {
                break;
            };
            state.active += 1;
            if tx.send(()).is_err() {
                state.active -= 1;
                debug!("dropping vanished queue waiter for {}", self.vhost());
            }
        }
    }

    /// Delegates backend selection to the balancer over the current view.
    pub fn pick(&self, client_ip: Option<&str>) -> Option<Arc<Backend>> {
        let backends = self.backends.read().unwrap();
        self.balancer.read().unwrap().pick(&backends, client_ip)
    }

    /// Credits one failure against a backend by id. Unknown ids are ignored:
    /// the backend list may have been swapped since the request was bound.
    pub fn mark_failure(&self, backend_id: &str) {
        let backends = self.backends.read().unwrap();
        if let Some(backend) = backends.iter().find(|b| b.id == backend_id) {
            if backend.record_failure() {
                warn!(
                    "vhost {}: backend {} removed from rotation",
                    self.vhost(),
                    backend_id
                );
            }
        }
    }

    /// Atomically replaces the configuration and the backend view handed to
    /// the balancer. Queued and active requests are preserved; the new
    /// admission limits apply immediately, so `active` may transiently
    /// exceed a reduced `max_active` until natural drainage.
    pub fn update_config(&self, new_config: RouteConfig) {
        let new_backends: Vec<Arc<Backend>> =
            new_config.backends.iter().map(Backend::from_config).collect();
        let strategy_changed = {
            let current = self.config.read().unwrap();
            current.strategy != new_config.strategy
        };

        *self.backends.write().unwrap() = new_backends;
        if strategy_changed {
            *self.balancer.write().unwrap() = Balancer::new(new_config.strategy);
        }
        *self.config.write().unwrap() = new_config;
    }

    /// Starts the quarantine recheck loop: every `interval`, each dead
    /// backend gets one `GET http://host:port/`; any status below 500
    /// restores it, while connect errors and timeouts leave it quarantined.
    ///
    /// Production passes [`QUARANTINE_RECHECK_INTERVAL`]; tests compress it.
    /// A previous loop for this route is cancelled first.
    pub fn start_recheck(self: &Arc<Self>, client: reqwest::Client, interval: Duration) {
        let route = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                route.recheck_dead_backends(&client).await;
            }
        });
        if let Some(previous) = self.recheck.lock().unwrap().replace(handle) {
            previous.abort();
        }
    }

    async fn recheck_dead_backends(&self, client: &reqwest::Client) {
        let dead: Vec<Arc<Backend>> = self
            .backends
            .read()
            .unwrap()
            .iter()
            .filter(|b| !b.is_alive())
            .cloned()
            .collect();

        for backend in dead {
            let url = format!("http://{}:{}/", backend.host, backend.port);
            let probe = tokio::time::timeout(QUARANTINE_PROBE_TIMEOUT, client.get(&url).send());
            match probe.await {
                Ok(Ok(response)) if response.status().as_u16() < 500 => {
                    backend.restore();
                    info!(
                        "vhost {}: backend {} passed recheck, back in rotation",
                        self.vhost(),
                        backend.id
                    );
                }
                Ok(Ok(response)) => {
                    debug!(
                        "vhost {}: backend {} recheck answered {}",
                        self.vhost(),
                        backend.id,
                        response.status()
                    );
                }
                Ok(Err(err)) => {
                    debug!(
                        "vhost {}: backend {} recheck failed: {}",
                        self.vhost(),
                        backend.id,
                        err
                    );
                }
                Err(_) => {
                    debug!(
                        "vhost {}: backend {} recheck timed out",
                        self.vhost(),
                        backend.id
                    );
                }
            }
        }
    }

    /// Cancels the recheck loop. Queued waiters are dropped, which resolves
    /// their grants as errors.
    pub fn stop(&self) {
        if let Some(handle) = self.recheck.lock().unwrap().take() {
            handle.abort();
        }
        self.admission.lock().unwrap().queue.clear();
    }

    fn max_active(&self) -> usize {
        self.config.read().unwrap().max_active
    }

    fn max_queued(&self) -> usize {
        self.config.read().unwrap().max_queued
    }
}

impl Drop for Route {
    fn drop(&mut self) {
        if let Some(handle) = self.recheck.lock().unwrap().take() {
            handle.abort();
        }
    }
}
