use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde_json::json;

/// Data-plane error taxonomy.
///
/// Every failure on the hot request path maps to exactly one client-facing
/// response. Admission rejections (400/404/503) carry plain-text bodies;
/// upstream failures (502/504) carry the JSON envelope
/// `{ "error", "code", "message" }`.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The request arrived without a Host header.
    #[error("Missing Host Header")]
    MissingHost,

    /// No route is installed for the requested virtual host.
    #[error("No route configured for {host}")]
    RouteNotFound { host: String },

    /// Both the active budget and the queue are full; the request is shed.
    #[error("Server Busy")]
    QueueFull,

    /// Every backend of the route is quarantined.
    #[error("Service Unavailable - No Healthy Backends")]
    NoHealthyBackend,

    /// The upstream did not answer within the deadline, or reset the
    /// connection mid-exchange.
    #[error("upstream timeout: {message}")]
    UpstreamTimeout { message: String },

    /// Any other upstream connect or I/O failure.
    #[error("upstream error: {message}")]
    Upstream { message: String },
}

impl actix_web::error::ResponseError for ProxyError {
    fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::MissingHost => StatusCode::BAD_REQUEST,
            ProxyError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            ProxyError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::NoHealthyBackend => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Upstream { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            ProxyError::MissingHost => {
                HttpResponse::BadRequest().body("Missing Host Header")
            }
            ProxyError::RouteNotFound { host } => {
                HttpResponse::NotFound().body(format!("No route configured for {}", host))
            }
            ProxyError::QueueFull => HttpResponse::ServiceUnavailable()
                .insert_header(("Retry-After", "10"))
                .body("Server Busy"),
            ProxyError::NoHealthyBackend => HttpResponse::ServiceUnavailable()
                .body("Service Unavailable - No Healthy Backends"),
            ProxyError::UpstreamTimeout { message } => {
                HttpResponse::GatewayTimeout().json(json!({
                    "error": "Gateway Timeout",
                    "code": "UPSTREAM_TIMEOUT",
                    "message": message,
                }))
            }
            ProxyError::Upstream { message } => HttpResponse::BadGateway().json(json!({
                "error": "Bad Gateway",
                "code": "UPSTREAM_ERROR",
                "message": message,
            })),
        }
    }
}
