//! janus reverse proxy server
//!
//! Binary entry point: brings up the data-plane listeners (plain HTTP and,
//! when `SSL_PORT` is set, TLS with per-vhost SNI resolution) and the
//! control-plane API, wired around one shared router and tracker.

use janus_rs::config::settings::load_settings;
use janus_rs::logs::logger::configure_logger;
use janus_rs::models::error::ProxyError;
use janus_rs::routes::{health, management};
use janus_rs::services::proxy::ProxyService;
use janus_rs::services::router::{tls_server_config, Router};
use janus_rs::services::tracker::Tracker;

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use log::{error, info};
use std::sync::Arc;
use tokio::signal;

/// Every data-plane request, regardless of method or path, goes through the
/// proxy engine.
async fn proxy_entry(
    req: HttpRequest,
    body: web::Bytes,
    proxy: web::Data<ProxyService>,
) -> Result<HttpResponse, ProxyError> {
    proxy.handle_request(req, body).await
}

fn env_port(name: &str, default: u16) -> u16 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    configure_logger();

    let settings = load_settings().expect("Failed to load settings");
    info!("Starting janus reverse proxy v{}", env!("CARGO_PKG_VERSION"));

    let router = Router::new();
    let tracker = Arc::new(Tracker::new());

    for mut route in settings.routes {
        route.normalize();
        match route.validate() {
            Ok(()) => {
                router.add_route(route);
            }
            Err(details) => {
                error!("Invalid bootstrap route {}:", route.id);
                for detail in &details {
                    error!("  - {}", detail);
                }
                std::process::exit(1);
            }
        }
    }
    info!("Installed {} bootstrap routes", router.get_routes().len());

    let proxy = web::Data::new(ProxyService::new(
        Arc::clone(&router),
        Arc::clone(&tracker),
    ));

    let port = env_port("PORT", 8080);
    let ssl_port = std::env::var("SSL_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok());
    let api_port = env_port("API_PORT", 8081);

    let mut data_server = {
        let proxy = proxy.clone();
        HttpServer::new(move || {
            App::new()
                .app_data(proxy.clone())
                .default_service(web::route().to(proxy_entry))
        })
    }
    .bind(("0.0.0.0", port))?;
    info!("Data plane listening on port {}", port);

    if let Some(ssl_port) = ssl_port {
        let tls = tls_server_config(Arc::clone(&router));
        data_server = data_server.bind_rustls_0_23(("0.0.0.0", ssl_port), tls)?;
        info!("TLS data plane listening on port {}", ssl_port);
    }
    let data_server = data_server.run();

    let control_plane = management::ControlPlane::new(Arc::clone(&router), Arc::clone(&tracker));
    let api_server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(control_plane.clone()))
            .configure(health::configure_health)
            .configure(management::configure_api)
    })
    .bind(("0.0.0.0", api_port))?
    .run();
    info!("Control plane listening on port {}", api_port);

    tokio::select! {
        result = data_server => {
            match result {
                Ok(_) => info!("Data plane stopped"),
                Err(e) => error!("Data plane error: {}", e),
            }
        }
        result = api_server => {
            match result {
                Ok(_) => info!("Control plane stopped"),
                Err(e) => error!("Control plane error: {}", e),
            }
        }
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal, stopping");
        }
    }

    router.stop();
    Ok(())
}
