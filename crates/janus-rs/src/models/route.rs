use crate::utils::host::normalize_vhost;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Backend selection strategy for distributing requests across a route's
/// backend set.
///
/// # Strategies
///
/// - **RoundRobin**: cycles through live backends in order (default)
/// - **Random**: uniform pick over live backends
/// - **IpHash**: hashes the client IP for sticky selection
/// - **LeastLatency**: reserved; behaves as RoundRobin in this version
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Cycle through live backends in circular order.
    RoundRobin,

    /// Uniform random pick over live backends.
    Random,

    /// Hash-based routing on the client IP for session stickiness.
    /// Sticky only up to the current set of live backends.
    IpHash,

    /// Reserved tag. Selection falls back to round-robin until a latency
    /// feedback loop exists.
    LeastLatency,
}

impl Default for Strategy {
    fn default() -> Self {
        Self::RoundRobin
    }
}

/// Declarative configuration of one upstream target.
///
/// # Examples
///
/// ```json
/// {
///   "id": "b1",
///   "host": "10.0.0.12",
///   "port": 8080
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Stable identifier, unique within the route.
    pub id: String,

    /// Bare hostname or IP address of the upstream. No scheme: the data
    /// plane always speaks plain HTTP to backends.
    pub host: String,

    /// Upstream port.
    pub port: u16,

    /// Reserved for weighted balancing (default: 1). Carried through the
    /// API but not consulted by any selection strategy yet.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

impl BackendConfig {
    /// Validates a single backend entry, collecting every problem found.
    pub fn validate(&self) -> Vec<String> {
        let mut details = Vec::new();

        if self.id.trim().is_empty() {
            details.push("backend id must not be empty".to_string());
        }
        if self.host.trim().is_empty() {
            details.push(format!("backend {}: host must not be empty", self.id));
        }
        if self.host.contains("://") {
            details.push(format!(
                "backend {}: host must be a bare hostname, without scheme",
                self.id
            ));
        }
        if self.port == 0 {
            details.push(format!("backend {}: port must be between 1 and 65535", self.id));
        }
        if self.weight == 0 {
            details.push(format!("backend {}: weight must be greater than 0", self.id));
        }

        details
    }
}

/// PEM-encoded key and certificate pair served for a route's virtual host
/// during the TLS handshake.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    /// PEM private key.
    pub key: String,

    /// PEM certificate chain, leaf first.
    pub cert: String,
}

/// Desired state of one virtual host.
///
/// A `RouteConfig` is the unit the control plane installs and replaces; the
/// data plane only ever observes it through an atomic swap on the runtime
/// route. Admission limits take effect immediately on swap.
///
/// # Examples
///
/// ```json
/// {
///   "id": "web",
///   "vhost": "app.example.com",
///   "strategy": "round_robin",
///   "max_active": 64,
///   "max_queued": 128,
///   "backends": [
///     {"id": "b1", "host": "10.0.0.12", "port": 8080},
///     {"id": "b2", "host": "10.0.0.13", "port": 8080}
///   ]
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RouteConfig {
    /// Stable route identifier.
    pub id: String,

    /// Virtual host this route serves. Stored host-only and lower-case;
    /// the Host header is compared case-sensitively against this key.
    pub vhost: String,

    /// Backend selection strategy.
    #[serde(default)]
    pub strategy: Strategy,

    /// Maximum number of concurrently forwarded requests.
    #[serde(default = "default_max_active")]
    pub max_active: usize,

    /// Maximum number of requests parked in the FIFO queue once the
    /// active budget is exhausted. Beyond this, requests are shed.
    #[serde(default = "default_max_queued")]
    pub max_queued: usize,

    /// Socket connect timeout toward backends, in milliseconds. The pooled
    /// forwarding client applies a process-wide default of 5000.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,

    /// End-to-end deadline for one forwarded request, in milliseconds
    /// (default 10000).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Extra headers injected verbatim onto every upstream request.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// TLS material served when clients reach this vhost over the TLS
    /// listener. Absent means SNI resolution yields nothing for this host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsMaterial>,

    /// Ordered backend set.
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

fn default_max_active() -> usize {
    100
}

fn default_max_queued() -> usize {
    100
}

impl RouteConfig {
    /// Rewrites `vhost` into its canonical routing key: trimmed,
    /// lower-cased, port stripped.
    pub fn normalize(&mut self) {
        self.vhost = normalize_vhost(&self.vhost);
    }

    /// Validates the whole route configuration.
    ///
    /// Unlike a fail-fast check, this collects every problem so the control
    /// plane can return them all in one `details` array.
    ///
    /// # Returns
    ///
    /// - `Ok(())` when the configuration is installable
    /// - `Err(details)` listing each violation
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut details = Vec::new();

        if self.id.trim().is_empty() {
            details.push("route id must not be empty".to_string());
        }
        if self.vhost.trim().is_empty() {
            details.push("vhost must not be empty".to_string());
        } else if self.vhost.contains(char::is_whitespace) {
            details.push("vhost must not contain whitespace".to_string());
        }
        if self.max_active == 0 {
            details.push("max_active must be greater than 0".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for backend in &self.backends {
            details.extend(backend.validate());
            if !seen.insert(backend.id.as_str()) {
                details.push(format!("duplicate backend id: {}", backend.id));
            }
        }

        if let Some(tls) = &self.tls {
            if tls.key.trim().is_empty() {
                details.push("tls key must not be empty".to_string());
            }
            if tls.cert.trim().is_empty() {
                details.push("tls cert must not be empty".to_string());
            }
        }

        if details.is_empty() {
            Ok(())
        } else {
            Err(details)
        }
    }
}
