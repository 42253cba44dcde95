//! The per-request admission, forward, and finalize engine.
//!
//! Every request arriving on a data-plane listener flows through
//! [`ProxyService::handle_request`]:
//!
//! ```text
//! Host header -> route lookup -> admission (forward | queue | shed)
//!             -> backend pick -> upstream send -> finalize -> queue pump
//! ```
//!
//! Finalize is the single join point for every terminal edge: a delivered
//! response, an upstream failure, and a client abort all converge there.
//! An RAII guard owns the finalize obligation, so dropping the request
//! future (actix drops it when the client hangs up) settles the accounting
//! without writing to a closed socket.

use crate::models::error::ProxyError;
use crate::models::route::RouteConfig;
use crate::services::route::{Admission, Route};
use crate::services::router::Router;
use crate::services::tracker::Tracker;
use crate::utils::host::strip_port;

use actix_web::http::{header, Method as ActixMethod, StatusCode};
use actix_web::{web, HttpRequest, HttpResponse};
use log::{debug, warn};
use reqwest::header::{HeaderMap as UpstreamHeaderMap, HeaderName, HeaderValue};
use reqwest::Method as UpstreamMethod;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Socket-connect timeout of the pooled forwarding client.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// End-to-end deadline for one forwarded request unless the route
/// overrides it.
pub const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_secs(10);

/// One in-flight client request.
///
/// Carries the identity and accounting state that outlives any single
/// await point: the vhost it resolved to, the client address, the backend
/// it was bound to, and the terminal latch. The association between the
/// native request and this value is a plain local owned by the handling
/// scope, never a property smuggled onto foreign types.
#[derive(Debug)]
pub struct ProxyRequest {
    pub id: Uuid,
    pub start: Instant,
    pub vhost: String,
    pub client_ip: Option<String>,
    target_id: OnceLock<String>,
    is_ended: AtomicBool,
}

impl ProxyRequest {
    pub fn new(vhost: &str, client_ip: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            start: Instant::now(),
            vhost: vhost.to_string(),
            client_ip,
            target_id: OnceLock::new(),
            is_ended: AtomicBool::new(false),
        })
    }

    /// The backend this request was bound to, once chosen.
    pub fn target_id(&self) -> Option<&str> {
        self.target_id.get().map(String::as_str)
    }

    pub fn set_target(&self, backend_id: &str) {
        let _ = self.target_id.set(backend_id.to_string());
    }

    pub fn is_ended(&self) -> bool {
        self.is_ended.load(Ordering::SeqCst)
    }

    /// Flips the terminal latch. Only the first caller observes `true`.
    fn end(&self) -> bool {
        !self.is_ended.swap(true, Ordering::SeqCst)
    }
}

/// Owns the routing table, the stats tracker, and the pooled forwarding
/// client; drives every request through admission, forward, and finalize.
pub struct ProxyService {
    client: reqwest::Client,
    router: Arc<Router>,
    tracker: Arc<Tracker>,
}

impl ProxyService {
    /// Builds the service around a shared router and tracker. The
    /// forwarding client pools connections (30 s idle, up to 32 idle per
    /// host) and applies the process-wide connect timeout; the end-to-end
    /// deadline is enforced per request.
    pub fn new(router: Arc<Router>, tracker: Arc<Tracker>) -> Self {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(32)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .expect("Failed to create forwarding HTTP client");
        Self {
            client,
            router,
            tracker,
        }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn tracker(&self) -> &Arc<Tracker> {
        &self.tracker
    }

    /// Admits and forwards one client request.
    ///
    /// # Admission
    ///
    /// - no Host header: 400, no stats
    /// - unknown vhost: 404, no stats
    /// - active budget free: forward now
    /// - queue has room: park FIFO until the pump grants a slot
    /// - both exhausted: 503 with `Retry-After: 10`, error counted
    pub async fn handle_request(
        &self,
        req: HttpRequest,
        body: web::Bytes,
    ) -> Result<HttpResponse, ProxyError> {
        let host_header = req
            .headers()
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(ProxyError::MissingHost)?;
        let hostname = strip_port(host_header).to_string();

        let route = self
            .router
            .get_route(&hostname)
            .ok_or(ProxyError::RouteNotFound {
                host: hostname.clone(),
            })?;

        let client_ip = req
            .connection_info()
            .realip_remote_addr()
            .map(|addr| addr.to_string());
        let request = ProxyRequest::new(&hostname, client_ip);
        debug!(
            "{} {} {} -> vhost {}",
            request.id,
            req.method(),
            req.uri(),
            hostname
        );

        match route.try_admit() {
            Admission::Admitted => {}
            Admission::Queued(grant) => {
                debug!("{} queued for vhost {}", request.id, hostname);
                if grant.await.is_err() {
                    // The route was stopped or replaced while we waited.
                    return Err(ProxyError::QueueFull);
                }
            }
            Admission::Rejected => {
                self.tracker.on_error(&request.vhost, "QUEUE_FULL");
                return Err(ProxyError::QueueFull);
            }
        }

        self.forward(route, request, req, body).await
    }

    /// Forwards an admitted request to one picked backend.
    ///
    /// The caller has already reserved an active slot; this either converts
    /// it into a tracked in-flight request or returns it (no healthy
    /// backend). All terminal edges run through [`finalize_request`].
    async fn forward(
        &self,
        route: Arc<Route>,
        request: Arc<ProxyRequest>,
        req: HttpRequest,
        body: web::Bytes,
    ) -> Result<HttpResponse, ProxyError> {
        let Some(backend) = route.pick(request.client_ip.as_deref()) else {
            route.release_slot();
            route.pump();
            return Err(ProxyError::NoHealthyBackend);
        };
        request.set_target(&backend.id);
        self.tracker.on_start(&request.vhost);

        let guard = InflightGuard {
            router: Arc::clone(&self.router),
            tracker: Arc::clone(&self.tracker),
            route: Arc::clone(&route),
            request: Arc::clone(&request),
        };

        let config = route.config();
        let scheme = req.connection_info().scheme().to_string();
        let path = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let target_url = format!("http://{}:{}{}", backend.host, backend.port, path);
        let headers = upstream_headers(&req, request.client_ip.as_deref(), &scheme, &config);
        let method = upstream_method(req.method());
        let deadline = config
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_PROXY_TIMEOUT);

        debug!("{} forwarding to {}", request.id, target_url);
        let outcome = tokio::time::timeout(
            deadline,
            self.client
                .request(method, &target_url)
                .headers(headers)
                .body(body.to_vec())
                .send(),
        )
        .await;

        match outcome {
            Ok(Ok(upstream)) => {
                let status = upstream.status().as_u16();
                let mut builder = HttpResponse::build(
                    StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                );
                for (key, value) in upstream.headers() {
                    if is_hop_header(key.as_str()) {
                        continue;
                    }
                    if let Ok(header_value) =
                        actix_web::http::header::HeaderValue::from_bytes(value.as_bytes())
                    {
                        builder.insert_header((key.as_str(), header_value));
                    }
                }

                match upstream.bytes().await {
                    Ok(bytes) => {
                        // A delivered 5xx still counts as an error for metrics.
                        guard.finish(status < 500);
                        Ok(builder.body(bytes))
                    }
                    Err(err) => {
                        warn!("{} upstream body read failed: {}", request.id, err);
                        route.mark_failure(&backend.id);
                        guard.finish(false);
                        Err(classify_upstream_error(&err))
                    }
                }
            }
            Ok(Err(err)) => {
                warn!("{} upstream request failed: {}", request.id, err);
                route.mark_failure(&backend.id);
                guard.finish(false);
                Err(classify_upstream_error(&err))
            }
            Err(_) => {
                warn!(
                    "{} upstream {} exceeded {} ms deadline",
                    request.id,
                    target_url,
                    deadline.as_millis()
                );
                route.mark_failure(&backend.id);
                guard.finish(false);
                Err(ProxyError::UpstreamTimeout {
                    message: format!(
                        "upstream did not respond within {} ms",
                        deadline.as_millis()
                    ),
                })
            }
        }
    }

    /// The idempotent terminal action; see [`finalize_request`].
    pub fn finalize(&self, route: &Arc<Route>, request: &ProxyRequest, success: bool) {
        finalize_request(&self.router, &self.tracker, route, request, success);
    }
}

/// Settles one active request exactly once: flips the latch, returns the
/// active slot, updates the tracker, and pumps the queue. The route's
/// accounting is only touched while it is still the installed route for
/// the vhost; a route removed or replaced mid-flight keeps its final
/// counters untouched.
fn finalize_request(
    router: &Router,
    tracker: &Tracker,
    route: &Arc<Route>,
    request: &ProxyRequest,
    success: bool,
) {
    if !request.end() {
        return;
    }
    let still_installed = router
        .get_route(&request.vhost)
        .map(|current| Arc::ptr_eq(&current, route))
        .unwrap_or(false);
    if !still_installed {
        return;
    }
    route.release_slot();
    tracker.on_end(request, success);
    route.pump();
}

/// Holds the finalize obligation for one in-flight request.
///
/// `finish` settles it with the observed outcome; dropping the guard
/// without finishing (client abort, cancellation) settles it as a failure.
/// The request latch makes the second path a no-op after the first.
struct InflightGuard {
    router: Arc<Router>,
    tracker: Arc<Tracker>,
    route: Arc<Route>,
    request: Arc<ProxyRequest>,
}

impl InflightGuard {
    fn finish(&self, success: bool) {
        finalize_request(
            &self.router,
            &self.tracker,
            &self.route,
            &self.request,
            success,
        );
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        finalize_request(&self.router, &self.tracker, &self.route, &self.request, false);
    }
}

/// Timeout-class failures answer 504, everything else 502. Connection
/// resets are grouped with timeouts: both mean the backend went silent
/// mid-exchange.
fn classify_upstream_error(err: &reqwest::Error) -> ProxyError {
    let message = err_chain(err);
    let lower = message.to_lowercase();
    if err.is_timeout()
        || lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("connection reset")
    {
        ProxyError::UpstreamTimeout { message }
    } else {
        ProxyError::Upstream { message }
    }
}

fn err_chain(err: &reqwest::Error) -> String {
    use std::error::Error;
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

const SKIP_REQUEST_HEADERS: &[&str] = &[
    "host",
    "connection",
    "upgrade",
    "proxy-connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "content-length",
    "x-forwarded-for",
];

fn is_hop_header(name: &str) -> bool {
    name.starts_with("connection")
        || name == "transfer-encoding"
        || name == "content-length"
        || name == "keep-alive"
}

/// Builds the outgoing header set: client headers minus hop-by-hop ones,
/// the forwarding triplet, and the route's verbatim extra headers.
fn upstream_headers(
    req: &HttpRequest,
    client_ip: Option<&str>,
    scheme: &str,
    config: &RouteConfig,
) -> UpstreamHeaderMap {
    let original = req.headers();
    let mut headers = UpstreamHeaderMap::with_capacity(original.len() + 4);

    for (key, value) in original {
        let name = key.as_str();
        if SKIP_REQUEST_HEADERS.iter().any(|skip| name == *skip) {
            continue;
        }
        if let (Ok(header_name), Ok(header_value)) = (
            HeaderName::from_bytes(key.as_ref()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.insert(header_name, header_value);
        }
    }

    if let Some(ip) = client_ip {
        let forwarded_for = match original
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
        {
            Some(chain) => format!("{}, {}", chain, ip),
            None => ip.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            headers.insert(HeaderName::from_static("x-forwarded-for"), value);
        }
        if let Ok(value) = HeaderValue::from_str(ip) {
            headers.insert(HeaderName::from_static("x-real-ip"), value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(scheme) {
        headers.insert(HeaderName::from_static("x-forwarded-proto"), value);
    }

    inject_custom_headers(&mut headers, &config.headers);
    headers
}

fn inject_custom_headers(headers: &mut UpstreamHeaderMap, extra: &HashMap<String, String>) {
    for (name, value) in extra {
        if let (Ok(header_name), Ok(header_value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(header_name, header_value);
        }
    }
}

fn upstream_method(method: &ActixMethod) -> UpstreamMethod {
    UpstreamMethod::from_bytes(method.as_str().as_bytes()).unwrap_or(UpstreamMethod::GET)
}
