//! Control-plane API for runtime route management.
//!
//! All endpoints live under `/api/v1`, speak JSON both ways, and mutate the
//! shared router/tracker directly; no restart is involved. Installing a
//! route for an existing vhost is a destructive replacement: the previous
//! route's queue and active counter are discarded with it.

use actix_web::{delete, get, post, web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::models::route::{BackendConfig, RouteConfig, TlsMaterial};
use crate::services::router::Router;
use crate::services::tracker::Tracker;
use crate::utils::host::normalize_vhost;

/// Shared state for the management endpoints.
#[derive(Clone)]
pub struct ControlPlane {
    router: Arc<Router>,
    tracker: Arc<Tracker>,
}

impl ControlPlane {
    pub fn new(router: Arc<Router>, tracker: Arc<Tracker>) -> Self {
        Self { router, tracker }
    }
}

/// Certificate upload payload for an already-installed vhost.
#[derive(Serialize, Deserialize)]
pub struct CertificateUpload {
    /// vHost the material belongs to. Unknown domains are a 404, never an
    /// implicit route create.
    pub domain: String,
    /// PEM private key.
    pub key: String,
    /// PEM certificate chain.
    pub cert: String,
}

fn validation_error(details: Vec<String>) -> HttpResponse {
    HttpResponse::BadRequest().json(json!({
        "error": "Validation Error",
        "details": details,
    }))
}

fn route_not_found(vhost: &str) -> HttpResponse {
    HttpResponse::NotFound().json(json!({
        "error": format!("No route configured for {}", vhost),
    }))
}

/// List all installed routes.
///
/// `GET /api/v1/routes`
#[get("/routes")]
pub async fn list_routes(cp: web::Data<ControlPlane>) -> impl Responder {
    HttpResponse::Ok().json(cp.router.route_configs())
}

/// Install or replace a route. Idempotent upsert by vhost; replacement is
/// destructive (queue and active counter reset with the new route).
///
/// `POST /api/v1/routes`
#[post("/routes")]
pub async fn upsert_route(
    cp: web::Data<ControlPlane>,
    config: web::Json<RouteConfig>,
) -> impl Responder {
    let mut config = config.into_inner();
    config.normalize();
    if let Err(details) = config.validate() {
        return validation_error(details);
    }

    cp.router.add_route(config.clone());
    HttpResponse::Created().json(config)
}

/// Fetch one route's configuration.
///
/// `GET /api/v1/routes/{vhost}`
#[get("/routes/{vhost}")]
pub async fn get_route(cp: web::Data<ControlPlane>, path: web::Path<String>) -> impl Responder {
    let vhost = path.into_inner();
    match cp.router.get_route(&vhost) {
        Some(route) => HttpResponse::Ok().json(route.config()),
        None => route_not_found(&vhost),
    }
}

/// Remove a route and its stats entry.
///
/// `DELETE /api/v1/routes/{vhost}`
#[delete("/routes/{vhost}")]
pub async fn delete_route(cp: web::Data<ControlPlane>, path: web::Path<String>) -> impl Responder {
    let vhost = path.into_inner();
    if cp.router.remove_route(&vhost) {
        cp.tracker.remove(&vhost);
        HttpResponse::NoContent().finish()
    } else {
        route_not_found(&vhost)
    }
}

/// Add (or replace by id) one backend on an existing route.
///
/// `POST /api/v1/routes/{vhost}/backends`
#[post("/routes/{vhost}/backends")]
pub async fn add_backend(
    cp: web::Data<ControlPlane>,
    path: web::Path<String>,
    backend: web::Json<BackendConfig>,
) -> impl Responder {
    let vhost = path.into_inner();
    let backend = backend.into_inner();

    let details = backend.validate();
    if !details.is_empty() {
        return validation_error(details);
    }

    let Some(route) = cp.router.get_route(&vhost) else {
        return route_not_found(&vhost);
    };

    let mut config = route.config();
    config.backends.retain(|existing| existing.id != backend.id);
    config.backends.push(backend.clone());
    route.update_config(config);

    HttpResponse::Created().json(backend)
}

/// Remove one backend from a route by id.
///
/// `DELETE /api/v1/routes/{vhost}/backends/{id}`
#[delete("/routes/{vhost}/backends/{id}")]
pub async fn delete_backend(
    cp: web::Data<ControlPlane>,
    path: web::Path<(String, String)>,
) -> impl Responder {
    let (vhost, backend_id) = path.into_inner();

    let Some(route) = cp.router.get_route(&vhost) else {
        return route_not_found(&vhost);
    };

    let mut config = route.config();
    let before = config.backends.len();
    config.backends.retain(|backend| backend.id != backend_id);
    if config.backends.len() == before {
        return HttpResponse::NotFound().json(json!({
            "error": format!("No backend {} on vhost {}", backend_id, vhost),
        }));
    }
    route.update_config(config);

    HttpResponse::NoContent().finish()
}

/// Attach TLS material to an existing route's vhost.
///
/// `POST /api/v1/certificates`
#[post("/certificates")]
pub async fn upload_certificate(
    cp: web::Data<ControlPlane>,
    upload: web::Json<CertificateUpload>,
) -> impl Responder {
    let upload = upload.into_inner();
    let domain = normalize_vhost(&upload.domain);

    let mut details = Vec::new();
    if upload.key.trim().is_empty() {
        details.push("key must not be empty".to_string());
    }
    if upload.cert.trim().is_empty() {
        details.push("cert must not be empty".to_string());
    }
    if !details.is_empty() {
        return validation_error(details);
    }

    let Some(route) = cp.router.get_route(&domain) else {
        return route_not_found(&domain);
    };

    let mut config = route.config();
    config.tls = Some(TlsMaterial {
        key: upload.key,
        cert: upload.cert,
    });
    route.update_config(config);

    HttpResponse::Ok().json(json!({ "success": true }))
}

/// Stats for every vhost.
///
/// `GET /api/v1/stats`
#[get("/stats")]
pub async fn all_stats(cp: web::Data<ControlPlane>) -> impl Responder {
    HttpResponse::Ok().json(cp.tracker.snapshot())
}

/// Stats for one vhost.
///
/// `GET /api/v1/stats/{vhost}`
#[get("/stats/{vhost}")]
pub async fn vhost_stats(cp: web::Data<ControlPlane>, path: web::Path<String>) -> impl Responder {
    let vhost = path.into_inner();
    match cp.tracker.snapshot_for(&vhost) {
        Some(stats) => HttpResponse::Ok().json(stats),
        None => route_not_found(&vhost),
    }
}

/// Registers the management endpoints under `/api/v1`.
pub fn configure_api(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(list_routes)
            .service(upsert_route)
            .service(get_route)
            .service(delete_route)
            .service(add_backend)
            .service(delete_backend)
            .service(upload_certificate)
            .service(all_stats)
            .service(vhost_stats),
    );
}
