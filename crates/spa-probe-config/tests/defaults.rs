//! Tests for default values and derived settings.

use serde_json::json;
use spa_probe_config::{ConfigError, HarnessConfig, Viewport};
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn harness_config_defaults() {
    let config = HarnessConfig::default();
    assert_eq!(config.base_url, "http://localhost:8080/admin-next");
    assert!(config.backend_url.is_none());
    assert!(!config.ci);
    assert!(!config.verbose);
    assert!(config.headless);
    assert_eq!(config.reports_dir, PathBuf::from("probe-reports"));
    assert_eq!(config.viewport, Viewport { width: 1280, height: 720 });
    assert_eq!(config.navigation_timeout(), Duration::from_secs(30));
    assert_eq!(config.action_timeout(), Duration::from_secs(15));
    assert_eq!(config.artifact_timeout(), Duration::from_secs(5));
    assert!(config.validate().is_ok());
}

#[test]
fn ci_mode_changes_retries_and_workers() {
    let local = HarnessConfig::default();
    assert_eq!(local.retries(), 0);
    assert_eq!(local.workers(), None);

    let ci = HarnessConfig {
        ci: true,
        ..HarnessConfig::default()
    };
    assert_eq!(ci.retries(), 2);
    assert_eq!(ci.workers(), Some(1));
}

#[test]
fn partial_value_keeps_defaults() {
    let config = HarnessConfig::from_value(json!({
        "base_url": "https://qa.example.com/admin-next",
        "viewport": { "width": 1920, "height": 1080 }
    }))
    .unwrap();

    assert_eq!(config.base_url, "https://qa.example.com/admin-next");
    assert_eq!(config.viewport, Viewport { width: 1920, height: 1080 });
    assert_eq!(config.navigation_timeout_ms, 30_000);
}

#[test]
fn wrong_types_are_rejected() {
    let err = HarnessConfig::from_value(json!({ "navigation_timeout_ms": "soon" })).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }));
}

#[test]
fn validation_rejects_bad_values() {
    let bad_scheme = HarnessConfig {
        base_url: "file:///tmp/index.html".into(),
        ..HarnessConfig::default()
    };
    assert!(bad_scheme.validate().is_err());

    let bad_backend = HarnessConfig {
        backend_url: Some("not a url".into()),
        ..HarnessConfig::default()
    };
    assert!(bad_backend.validate().is_err());

    let zero_viewport = HarnessConfig {
        viewport: Viewport { width: 0, height: 720 },
        ..HarnessConfig::default()
    };
    assert!(zero_viewport.validate().is_err());

    let zero_timeout = HarnessConfig {
        navigation_timeout_ms: 0,
        ..HarnessConfig::default()
    };
    assert!(zero_timeout.validate().is_err());
}

#[test]
fn toml_rendering_reloads_to_the_same_config() {
    let config = HarnessConfig {
        backend_url: Some("http://localhost:8081".into()),
        ci: true,
        ..HarnessConfig::default()
    };
    let rendered = config.to_toml().unwrap();
    assert!(rendered.contains("base_url = \"http://localhost:8080/admin-next\""));
    assert!(rendered.contains("[viewport]"));

    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("spa-probe.toml"), &rendered).unwrap();
    let reloaded = spa_probe_config::ConfigLoader::new(dir.path()).without_env().load().unwrap();
    assert_eq!(reloaded, config);
}
