//! Bootstrap configuration loading.

pub mod settings;
