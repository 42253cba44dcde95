//! End-to-end tests of the admission, forward, and finalize engine against
//! synthetic loopback backends.

use actix_web::{test, web, ResponseError};
use janus_rs::models::error::ProxyError;
use janus_rs::models::route::{BackendConfig, RouteConfig, Strategy};
use janus_rs::services::proxy::{ProxyRequest, ProxyService};
use janus_rs::services::route::Admission;
use janus_rs::services::router::Router;
use janus_rs::services::tracker::Tracker;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

async fn read_head(socket: &mut TcpStream) -> Vec<u8> {
    let mut head = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        head.extend_from_slice(&chunk[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    head
}

async fn write_response(socket: &mut TcpStream, status: &str, body: &[u8]) {
    let head = format!(
        "HTTP/1.1 {}\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
        status,
        body.len()
    );
    let _ = socket.write_all(head.as_bytes()).await;
    let _ = socket.write_all(body).await;
}

/// Backend that answers 200 with a fixed body.
async fn spawn_backend(body: &'static str) -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                read_head(&mut socket).await;
                write_response(&mut socket, "200 OK", body.as_bytes()).await;
            });
        }
    });
    (port, handle)
}

/// Backend that holds every response until the gate hands out a permit.
async fn spawn_gated_backend(gate: Arc<Semaphore>, body: &'static str) -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                read_head(&mut socket).await;
                let permit = gate.acquire().await.unwrap();
                permit.forget();
                write_response(&mut socket, "200 OK", body.as_bytes()).await;
            });
        }
    });
    (port, handle)
}

/// Backend that echoes the received request head in its response body.
async fn spawn_capture_backend() -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let head = read_head(&mut socket).await;
                write_response(&mut socket, "200 OK", &head).await;
            });
        }
    });
    (port, handle)
}

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn service() -> (Arc<ProxyService>, Arc<Router>, Arc<Tracker>) {
    let router = Router::new();
    let tracker = Arc::new(Tracker::new());
    let proxy = Arc::new(ProxyService::new(Arc::clone(&router), Arc::clone(&tracker)));
    (proxy, router, tracker)
}

fn backend_cfg(id: &str, port: u16) -> BackendConfig {
    BackendConfig {
        id: id.to_string(),
        host: "127.0.0.1".to_string(),
        port,
        weight: 1,
    }
}

fn route_to(
    vhost: &str,
    backends: Vec<BackendConfig>,
    max_active: usize,
    max_queued: usize,
) -> RouteConfig {
    RouteConfig {
        id: vhost.to_string(),
        vhost: vhost.to_string(),
        strategy: Strategy::RoundRobin,
        max_active,
        max_queued,
        connect_timeout_ms: None,
        timeout_ms: None,
        headers: HashMap::new(),
        tls: None,
        backends,
    }
}

fn request_for(host: &str) -> (actix_web::HttpRequest, web::Bytes) {
    let req = test::TestRequest::get()
        .uri("/")
        .insert_header(("Host", host))
        .to_http_request();
    (req, web::Bytes::new())
}

#[actix_web::test]
async fn forwards_to_the_backend_and_tracks_stats() {
    let (port, _backend) = spawn_backend("hello from b1").await;
    let (proxy, router, tracker) = service();
    router.add_route(route_to("t1.local", vec![backend_cfg("b1", port)], 4, 4));

    let (req, body) = request_for("t1.local");
    let response = proxy.handle_request(req, body).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let bytes = actix_web::body::to_bytes(response.into_body()).await.unwrap();
    assert_eq!(&bytes[..], b"hello from b1");

    let stats = tracker.snapshot_for("t1.local").unwrap();
    assert_eq!(stats.requests_total, 1);
    assert_eq!(stats.errors_total, 0);
    assert_eq!(stats.requests_active, 0);
}

#[actix_web::test]
async fn host_header_port_is_stripped() {
    let (port, _backend) = spawn_backend("ok").await;
    let (proxy, router, _tracker) = service();
    router.add_route(route_to("t1.local", vec![backend_cfg("b1", port)], 4, 4));

    let (req, body) = request_for("t1.local:8080");
    let response = proxy.handle_request(req, body).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
}

#[actix_web::test]
async fn missing_host_header_is_a_400() {
    let (proxy, _router, tracker) = service();

    let req = test::TestRequest::get().uri("/").to_http_request();
    let err = proxy.handle_request(req, web::Bytes::new()).await.unwrap_err();
    assert!(matches!(err, ProxyError::MissingHost));
    assert_eq!(err.status_code().as_u16(), 400);
    assert!(tracker.snapshot().is_empty());
}

#[actix_web::test]
async fn unknown_vhost_is_a_404() {
    let (proxy, _router, tracker) = service();

    let (req, body) = request_for("unknown.local");
    let err = proxy.handle_request(req, body).await.unwrap_err();
    assert!(matches!(err, ProxyError::RouteNotFound { .. }));
    assert_eq!(err.status_code().as_u16(), 404);
    assert!(tracker.snapshot().is_empty());
}

#[actix_web::test]
async fn forwarding_headers_are_injected() {
    let (port, _backend) = spawn_capture_backend().await;
    let (proxy, router, _tracker) = service();
    let mut cfg = route_to("t1.local", vec![backend_cfg("b1", port)], 4, 4);
    cfg.headers
        .insert("x-proxied-by".to_string(), "janus".to_string());
    router.add_route(cfg);

    let req = test::TestRequest::get()
        .uri("/echo?x=1")
        .insert_header(("Host", "t1.local"))
        .peer_addr("9.9.9.9:40000".parse().unwrap())
        .to_http_request();
    let response = proxy.handle_request(req, web::Bytes::new()).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let bytes = actix_web::body::to_bytes(response.into_body()).await.unwrap();
    let head = String::from_utf8_lossy(&bytes).to_lowercase();
    assert!(head.starts_with("get /echo?x=1 http/1.1"), "head: {}", head);
    assert!(head.contains("x-forwarded-for: 9.9.9.9"), "head: {}", head);
    assert!(head.contains("x-real-ip: 9.9.9.9"), "head: {}", head);
    assert!(head.contains("x-forwarded-proto: http"), "head: {}", head);
    assert!(head.contains("x-proxied-by: janus"), "head: {}", head);
}

#[actix_web::test]
async fn saturated_route_queues_then_sheds_then_drains() {
    let gate = Arc::new(Semaphore::new(0));
    let (port, _backend) = spawn_gated_backend(Arc::clone(&gate), "drained").await;
    let (proxy, router, tracker) = service();
    router.add_route(route_to("t1.local", vec![backend_cfg("b1", port)], 1, 2));
    let route = router.get_route("t1.local").unwrap();

    let mut parked = Vec::new();
    for _ in 0..3 {
        let proxy = Arc::clone(&proxy);
        parked.push(actix_web::rt::spawn(async move {
            let (req, body) = request_for("t1.local");
            proxy
                .handle_request(req, body)
                .await
                .map(|response| response.status().as_u16())
        }));
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // One active, two queued.
    assert_eq!(route.active_count(), 1);
    assert_eq!(route.queue_len(), 2);

    // The fourth request is shed with Retry-After and counted as an error.
    let (req, body) = request_for("t1.local");
    let err = proxy.handle_request(req, body).await.unwrap_err();
    assert!(matches!(err, ProxyError::QueueFull));
    let shed = err.error_response();
    assert_eq!(shed.status().as_u16(), 503);
    assert_eq!(shed.headers().get("Retry-After").unwrap(), "10");
    assert_eq!(tracker.snapshot_for("t1.local").unwrap().errors_total, 1);

    // Unblock the backend; every parked request completes.
    gate.add_permits(3);
    for task in parked {
        assert_eq!(task.await.unwrap().unwrap(), 200);
    }

    let stats = tracker.snapshot_for("t1.local").unwrap();
    assert_eq!(stats.requests_total, 3);
    assert_eq!(stats.errors_total, 1);
    assert_eq!(stats.requests_active, 0);
    assert_eq!(route.active_count(), 0);
    assert_eq!(route.queue_len(), 0);
}

#[actix_web::test]
async fn all_backends_dead_is_a_503_without_stats() {
    let (proxy, router, tracker) = service();
    let route = router.add_route(route_to("t1.local", vec![backend_cfg("b1", 9001)], 2, 2));
    for _ in 0..3 {
        route.mark_failure("b1");
    }

    let (req, body) = request_for("t1.local");
    let err = proxy.handle_request(req, body).await.unwrap_err();
    assert!(matches!(err, ProxyError::NoHealthyBackend));
    assert_eq!(err.status_code().as_u16(), 503);

    // Never became active: the slot was returned and nothing was tracked.
    assert_eq!(route.active_count(), 0);
    assert!(tracker.snapshot_for("t1.local").is_none());
}

#[actix_web::test]
async fn connect_failures_credit_the_backend_and_quarantine_it() {
    let port = free_port().await;
    let (proxy, router, tracker) = service();
    let route = router.add_route(route_to("t1.local", vec![backend_cfg("b1", port)], 4, 4));

    for _ in 0..3 {
        let (req, body) = request_for("t1.local");
        let err = proxy.handle_request(req, body).await.unwrap_err();
        assert_eq!(err.status_code().as_u16(), 502);

        let response = err.error_response();
        let bytes = actix_web::body::to_bytes(response.into_body()).await.unwrap();
        let envelope: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(envelope["error"], "Bad Gateway");
        assert_eq!(envelope["code"], "UPSTREAM_ERROR");
    }

    let b1 = route.backends().into_iter().next().unwrap();
    assert!(!b1.is_alive());
    assert!(b1.dead_since().is_some());

    let stats = tracker.snapshot_for("t1.local").unwrap();
    assert_eq!(stats.requests_total, 3);
    assert_eq!(stats.errors_total, 3);
    assert_eq!(stats.requests_active, 0);

    // With its only backend quarantined, the route now sheds on pick.
    let (req, body) = request_for("t1.local");
    let err = proxy.handle_request(req, body).await.unwrap_err();
    assert!(matches!(err, ProxyError::NoHealthyBackend));
}

#[actix_web::test]
async fn slow_upstream_times_out_with_504() {
    let gate = Arc::new(Semaphore::new(0));
    let (port, _backend) = spawn_gated_backend(gate, "never sent").await;
    let (proxy, router, tracker) = service();
    let mut cfg = route_to("t1.local", vec![backend_cfg("b1", port)], 4, 4);
    cfg.timeout_ms = Some(200);
    let route = router.add_route(cfg);

    let (req, body) = request_for("t1.local");
    let err = proxy.handle_request(req, body).await.unwrap_err();
    assert!(matches!(err, ProxyError::UpstreamTimeout { .. }));
    assert_eq!(err.status_code().as_u16(), 504);

    let response = err.error_response();
    let bytes = actix_web::body::to_bytes(response.into_body()).await.unwrap();
    let envelope: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(envelope["error"], "Gateway Timeout");
    assert_eq!(envelope["code"], "UPSTREAM_TIMEOUT");

    let b1 = route.backends().into_iter().next().unwrap();
    assert_eq!(b1.failure_count(), 1);

    let stats = tracker.snapshot_for("t1.local").unwrap();
    assert_eq!(stats.requests_total, 1);
    assert_eq!(stats.errors_total, 1);
    assert_eq!(stats.requests_active, 0);
}

#[actix_web::test]
async fn client_abort_finalizes_exactly_once() {
    let gate = Arc::new(Semaphore::new(0));
    let (port, _backend) = spawn_gated_backend(gate, "too late").await;
    let (proxy, router, tracker) = service();
    router.add_route(route_to("t1.local", vec![backend_cfg("b1", port)], 1, 2));
    let route = router.get_route("t1.local").unwrap();

    let task = {
        let proxy = Arc::clone(&proxy);
        actix_web::rt::spawn(async move {
            let (req, body) = request_for("t1.local");
            proxy
                .handle_request(req, body)
                .await
                .map(|response| response.status().as_u16())
        })
    };
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(route.active_count(), 1);

    // The client hangs up: the request future is dropped mid-forward.
    task.abort();
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert_eq!(route.active_count(), 0);
    let stats = tracker.snapshot_for("t1.local").unwrap();
    assert_eq!(stats.requests_total, 1);
    assert_eq!(stats.errors_total, 1);
    assert_eq!(stats.requests_active, 0);
}

#[actix_web::test]
async fn finalize_is_idempotent() {
    let (proxy, router, tracker) = service();
    let route = router.add_route(route_to("t1.local", vec![backend_cfg("b1", 9001)], 2, 2));

    assert!(matches!(route.try_admit(), Admission::Admitted));
    let request = ProxyRequest::new("t1.local", None);
    tracker.on_start("t1.local");

    proxy.finalize(&route, &request, false);
    proxy.finalize(&route, &request, false);

    assert_eq!(route.active_count(), 0);
    let stats = tracker.snapshot_for("t1.local").unwrap();
    assert_eq!(stats.requests_total, 1);
    assert_eq!(stats.errors_total, 1);
    assert_eq!(stats.requests_active, 0);
}

#[actix_web::test]
async fn recheck_restores_a_reachable_backend() {
    let (port, _backend) = spawn_backend("alive again").await;
    let (_proxy, router, _tracker) = service();
    let route = router.add_route(route_to("t1.local", vec![backend_cfg("b1", port)], 4, 4));

    for _ in 0..3 {
        route.mark_failure("b1");
    }
    let b1 = route.backends().into_iter().next().unwrap();
    assert!(!b1.is_alive());

    let probe = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    route.start_recheck(probe, Duration::from_millis(50));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(b1.is_alive());
    assert_eq!(b1.failure_count(), 0);
    assert!(b1.dead_since().is_none());
}

#[actix_web::test]
async fn recheck_leaves_an_unreachable_backend_quarantined() {
    let port = free_port().await;
    let (_proxy, router, _tracker) = service();
    let route = router.add_route(route_to("t1.local", vec![backend_cfg("b1", port)], 4, 4));

    for _ in 0..3 {
        route.mark_failure("b1");
    }
    let b1 = route.backends().into_iter().next().unwrap();

    let probe = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    route.start_recheck(probe, Duration::from_millis(50));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!b1.is_alive());
    assert!(b1.dead_since().is_some());
}
