//! Tests for bootstrap configuration loading.

use janus_rs::config::settings::load_settings;
use std::fs;

// One test function: the loader reads JANUS_CONFIG_PATH from the process
// environment, and parallel tests would race on it.
#[test]
fn load_settings_covers_missing_explicit_and_invalid_paths() {
    std::env::remove_var("JANUS_CONFIG_PATH");

    // Default path absent: empty start.
    let settings = load_settings().expect("missing default file should not fail");
    assert_eq!(settings.version, 1);
    assert!(settings.routes.is_empty());

    // Explicit path present: routes are parsed with serde defaults applied.
    let path = "./janus-settings-test.json";
    fs::write(
        path,
        r#"{
            "version": 1,
            "routes": [
                {
                    "id": "web",
                    "vhost": "app.local",
                    "backends": [{"id": "b1", "host": "127.0.0.1", "port": 9001}]
                }
            ]
        }"#,
    )
    .unwrap();
    std::env::set_var("JANUS_CONFIG_PATH", path);

    let settings = load_settings().expect("explicit file should load");
    assert_eq!(settings.routes.len(), 1);
    assert_eq!(settings.routes[0].vhost, "app.local");
    assert_eq!(settings.routes[0].max_active, 100);

    // Invalid JSON is an error, not a silent empty start.
    fs::write(path, "{ not json").unwrap();
    assert!(load_settings().is_err());

    // Explicitly configured but missing: an error.
    fs::remove_file(path).unwrap();
    assert!(load_settings().is_err());

    std::env::remove_var("JANUS_CONFIG_PATH");
}
