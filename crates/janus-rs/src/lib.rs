//! # janus
//!
//! A dynamic HTTP(S) reverse proxy built with Rust and Actix Web. janus
//! routes client traffic to per-virtual-host backend sets, enforces
//! per-route concurrency limits with FIFO queueing and load shedding,
//! quarantines failing backends behind a periodic recheck, and resolves
//! TLS certificates per SNI name. Routes, backends, and certificates are
//! installed and mutated at runtime through a control-plane HTTP API.
//!
//! ## Request lifecycle
//!
//! ```text
//! ┌─────────┐    ┌──────────────────────────────┐    ┌──────────┐
//! │ Client  │───▶│ janus data plane             │───▶│ Backends │
//! └─────────┘    │                              │    └──────────┘
//!                │  Host ──▶ Route lookup       │
//!                │  admission: forward/queue/   │
//!                │            shed              │
//!                │  balancer pick ──▶ forward   │
//!                │  finalize ──▶ queue pump     │
//!                └──────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - **[`models`]** - configuration types, validation, error taxonomy
//! - **[`services`]** - balancer, routes, router/SNI, tracker, proxy engine
//! - **[`routes`]** - control-plane HTTP endpoints
//! - **[`config`]** - bootstrap configuration loading
//! - **[`logs`]** - logging setup
//! - **[`utils`]** - host normalization helpers
//!
//! ## Bootstrap configuration example
//!
//! ```json
//! {
//!   "version": 1,
//!   "routes": [
//!     {
//!       "id": "web",
//!       "vhost": "app.example.com",
//!       "strategy": "round_robin",
//!       "max_active": 64,
//!       "max_queued": 128,
//!       "backends": [
//!         {"id": "b1", "host": "10.0.0.12", "port": 8080},
//!         {"id": "b2", "host": "10.0.0.13", "port": 8080}
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! ## Environment Variables
//!
//! - `PORT`: plain HTTP data-plane port (default: `8080`)
//! - `SSL_PORT`: optional TLS data-plane port with SNI resolution
//! - `API_PORT`: control-plane port (default: `8081`)
//! - `JANUS_CONFIG_PATH`: bootstrap file path (default: `./janus.json`)
//! - `NO_COLOR`: disable colored log output

pub mod config;
pub mod logs;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;
