//! Data models and domain types for the janus reverse proxy.
//!
//! - [`error`] - Data-plane error types with HTTP response mapping
//! - [`route`] - Route and backend configuration with validation logic

pub mod error;
pub mod route;
