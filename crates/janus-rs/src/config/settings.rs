use crate::models::route::RouteConfig;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Bootstrap configuration loaded once at process start.
///
/// The file is read-only from the proxy's perspective: runtime mutations go
/// through the control plane and are never written back.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u8,

    /// Routes installed before the listeners come up.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

fn default_version() -> u8 {
    1
}

/// Loads the bootstrap settings.
///
/// The path comes from `JANUS_CONFIG_PATH`, defaulting to `./janus.json`.
/// A missing file at the default path means an empty start (everything is
/// installed through the control plane); a missing file at an explicitly
/// configured path is an error.
///
/// The path must resolve inside the working directory, and the file is
/// capped at 10 MB.
pub fn load_settings() -> Result<Settings, Box<dyn std::error::Error>> {
    let explicit = std::env::var("JANUS_CONFIG_PATH").ok();
    let config_path = explicit
        .clone()
        .unwrap_or_else(|| "./janus.json".to_string());

    debug!("Loading bootstrap configuration from: {}", config_path);

    let path = Path::new(&config_path);
    if !path.exists() {
        if explicit.is_some() {
            return Err(format!("Cannot resolve config path '{}'", config_path).into());
        }
        info!("No bootstrap configuration at {}, starting empty", config_path);
        return Ok(Settings::default());
    }

    let canonical_path = path
        .canonicalize()
        .map_err(|e| format!("Cannot resolve config path '{}': {}", config_path, e))?;

    let current_dir = std::env::current_dir()
        .map_err(|e| format!("Cannot get current directory: {}", e))?;
    if !canonical_path.starts_with(&current_dir) {
        warn!("Config path '{}' is outside working directory", config_path);
        return Err("Config path outside working directory".into());
    }

    let metadata = fs::metadata(&canonical_path)
        .map_err(|e| format!("Cannot read config file metadata: {}", e))?;
    const MAX_CONFIG_SIZE: u64 = 10 * 1024 * 1024;
    if metadata.len() > MAX_CONFIG_SIZE {
        return Err(format!(
            "Config file too large: {} bytes (max: {} bytes)",
            metadata.len(),
            MAX_CONFIG_SIZE
        )
        .into());
    }

    let config_data = fs::read_to_string(&canonical_path)
        .map_err(|e| format!("Cannot read config file: {}", e))?;
    let settings: Settings =
        serde_json::from_str(&config_data).map_err(|e| format!("Invalid JSON: {}", e))?;

    debug!(
        "Loaded bootstrap configuration with {} routes",
        settings.routes.len()
    );

    Ok(settings)
}
