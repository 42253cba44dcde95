//! Virtual-host routing table and SNI certificate resolution.
//!
//! The router owns every runtime route, keyed by the canonical vhost.
//! Installing a config for an existing vhost is a destructive replacement:
//! the old route is stopped (recheck cancelled, queue drained) and the new
//! one starts empty. During TLS handshakes the router doubles as the
//! certificate source: the SNI name is looked up like a Host header and the
//! route's PEM material is turned into a signing key per handshake. No SNI
//! cache exists in this version.

use crate::models::route::RouteConfig;
use crate::services::route::{Route, QUARANTINE_PROBE_TIMEOUT, QUARANTINE_RECHECK_INTERVAL};
use log::{debug, error, info};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// vHost -> Route mapping plus the shared probe client handed to every
/// route's quarantine recheck loop.
pub struct Router {
    routes: RwLock<HashMap<String, Arc<Route>>>,
    probe_client: reqwest::Client,
}

impl Router {
    pub fn new() -> Arc<Self> {
        let probe_client = reqwest::Client::builder()
            .timeout(QUARANTINE_PROBE_TIMEOUT)
            .build()
            .expect("Failed to create probe HTTP client");
        Arc::new(Self {
            routes: RwLock::new(HashMap::new()),
            probe_client,
        })
    }

    /// Installs a route, replacing and stopping any previous route for the
    /// same vhost. The caller is expected to have normalized and validated
    /// the configuration.
    pub fn add_route(self: &Arc<Self>, config: RouteConfig) -> Arc<Route> {
        let vhost = config.vhost.clone();
        let route = Route::new(config);
        route.start_recheck(self.probe_client.clone(), QUARANTINE_RECHECK_INTERVAL);

        let previous = self
            .routes
            .write()
            .unwrap()
            .insert(vhost.clone(), Arc::clone(&route));
        if let Some(old) = previous {
            old.stop();
            info!("replaced route for vhost {}", vhost);
        } else {
            info!("installed route for vhost {}", vhost);
        }
        route
    }

    /// Stops and removes the route for a vhost.
    ///
    /// # Returns
    ///
    /// `false` when no route was installed for it.
    pub fn remove_route(&self, vhost: &str) -> bool {
        let removed = self.routes.write().unwrap().remove(vhost);
        match removed {
            Some(route) => {
                route.stop();
                info!("removed route for vhost {}", vhost);
                true
            }
            None => false,
        }
    }

    pub fn get_route(&self, vhost: &str) -> Option<Arc<Route>> {
        self.routes.read().unwrap().get(vhost).cloned()
    }

    pub fn get_routes(&self) -> Vec<Arc<Route>> {
        self.routes.read().unwrap().values().cloned().collect()
    }

    /// Configuration snapshots of every installed route.
    pub fn route_configs(&self) -> Vec<RouteConfig> {
        self.routes
            .read()
            .unwrap()
            .values()
            .map(|route| route.config())
            .collect()
    }

    /// Stops every route. Used on shutdown.
    pub fn stop(&self) {
        for route in self.routes.read().unwrap().values() {
            route.stop();
        }
    }

    /// Resolves TLS material for an SNI server name.
    ///
    /// Yields `None` when no route matches, the route carries no TLS
    /// material, or the material does not parse; the handshake then fails.
    /// The certified key is rebuilt per handshake.
    pub fn resolve_sni(&self, server_name: &str) -> Option<Arc<CertifiedKey>> {
        let Some(route) = self.get_route(server_name) else {
            debug!("no route for SNI name {}, rejecting handshake", server_name);
            return None;
        };
        let Some(tls) = route.config().tls else {
            debug!("vhost {} has no TLS material, rejecting handshake", server_name);
            return None;
        };
        match build_certified_key(&tls.key, &tls.cert) {
            Ok(key) => Some(Arc::new(key)),
            Err(err) => {
                error!("vhost {}: unusable TLS material: {}", server_name, err);
                None
            }
        }
    }
}

fn build_certified_key(key_pem: &str, cert_pem: &str) -> Result<CertifiedKey, String> {
    let certs = rustls_pemfile::certs(&mut cert_pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid certificate PEM: {}", e))?;
    if certs.is_empty() {
        return Err("certificate PEM contains no certificates".to_string());
    }

    let key_der = rustls_pemfile::private_key(&mut key_pem.as_bytes())
        .map_err(|e| format!("invalid key PEM: {}", e))?
        .ok_or_else(|| "key PEM contains no private key".to_string())?;
    let signing_key = rustls::crypto::ring::sign::any_supported_type(&key_der)
        .map_err(|e| format!("unsupported private key: {}", e))?;

    Ok(CertifiedKey::new(certs, signing_key))
}

/// rustls hook that answers TLS handshakes from the routing table.
pub struct SniCertResolver {
    router: Arc<Router>,
}

impl SniCertResolver {
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }
}

impl fmt::Debug for SniCertResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SniCertResolver")
    }
}

impl ResolvesServerCert for SniCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let server_name = client_hello.server_name()?;
        self.router.resolve_sni(server_name)
    }
}

/// Server-side TLS configuration backed by per-vhost SNI resolution.
///
/// The crypto provider is pinned to ring explicitly so the configuration
/// does not depend on a process-wide default.
pub fn tls_server_config(router: Arc<Router>) -> rustls::ServerConfig {
    rustls::ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .expect("Failed to select TLS protocol versions")
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(SniCertResolver::new(router)))
}
