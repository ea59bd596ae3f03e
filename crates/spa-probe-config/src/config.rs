//! The harness configuration read once at start-up.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConfigError, Result};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/admin-next";
pub const DEFAULT_REPORTS_DIR: &str = "probe-reports";

/// Browser viewport in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// URL of the SPA under test
    pub base_url: String,

    /// Back end probed directly into every report; `None` disables the probe
    pub backend_url: Option<String>,

    /// Running under CI: retries on, parallelism off
    pub ci: bool,

    /// Echo every captured page event through the log
    pub verbose: bool,

    pub reports_dir: PathBuf,

    pub headless: bool,

    pub viewport: Viewport,

    pub navigation_timeout_ms: u64,

    pub action_timeout_ms: u64,

    /// Budget for each individual report artifact
    pub artifact_timeout_ms: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            backend_url: None,
            ci: false,
            verbose: false,
            reports_dir: PathBuf::from(DEFAULT_REPORTS_DIR),
            headless: true,
            viewport: Viewport::default(),
            navigation_timeout_ms: 30_000,
            action_timeout_ms: 15_000,
            artifact_timeout_ms: 5_000,
        }
    }
}

impl HarnessConfig {
    /// Create from `serde_json::Value`, filling gaps with defaults.
    ///
    /// ```
    /// use spa_probe_config::HarnessConfig;
    /// use serde_json::json;
    ///
    /// let config = HarnessConfig::from_value(json!({ "ci": true })).unwrap();
    /// assert_eq!(config.retries(), 2);
    /// ```
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| ConfigError::invalid("config", e.to_string()))
    }

    /// Renders the configuration in `spa-probe.toml` syntax.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::invalid("config", e.to_string()))
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn artifact_timeout(&self) -> Duration {
        Duration::from_millis(self.artifact_timeout_ms)
    }

    /// Test retries: two in CI, none locally.
    pub fn retries(&self) -> u32 {
        if self.ci { 2 } else { 0 }
    }

    /// Parallel workers: one in CI, `None` (runner decides) locally.
    pub fn workers(&self) -> Option<usize> {
        self.ci.then_some(1)
    }

    /// Checks URL schemes, timeouts and viewport.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        check_url("base_url", &self.base_url)?;
        if let Some(url) = &self.backend_url {
            check_url("backend_url", url)?;
        }

        for (field, value) in [
            ("navigation_timeout_ms", self.navigation_timeout_ms),
            ("action_timeout_ms", self.action_timeout_ms),
            ("artifact_timeout_ms", self.artifact_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }

        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(ConfigError::invalid(
                "viewport",
                format!("{}x{} has a zero dimension", self.viewport.width, self.viewport.height),
            ));
        }

        if self.reports_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid("reports_dir", "must not be empty"));
        }

        Ok(())
    }
}

fn check_url(field: &str, url: &str) -> Result<()> {
    match url.split_once("://") {
        Some(("http" | "https", rest)) if !rest.is_empty() => Ok(()),
        Some((scheme, _)) => Err(ConfigError::invalid(
            field,
            format!("unsupported scheme '{scheme}' in '{url}' (expected http or https)"),
        )),
        None => Err(ConfigError::invalid(field, format!("'{url}' is not an absolute URL"))),
    }
}
