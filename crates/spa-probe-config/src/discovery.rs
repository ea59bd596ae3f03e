//! Layered loading of [`HarnessConfig`].
//!
//! Priority, lowest first: defaults, `spa-probe.toml`, `SPA_PROBE_*`
//! variables, then the bare `BASE_URL` / `CI` / `DEBUG` variables that
//! existing test pipelines already export.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format as _, Serialized, Toml};
use tracing::{debug, warn};

use crate::config::HarnessConfig;
use crate::error::{ConfigError, Result};

/// Conventional config file name.
pub const CONFIG_FILE: &str = "spa-probe.toml";

/// Prefix of harness environment variables. Nested keys use `__`
/// (`SPA_PROBE_VIEWPORT__WIDTH`).
pub const ENV_PREFIX: &str = "SPA_PROBE_";

/// File-based config discovery.
///
/// # Example
///
/// ```no_run
/// use spa_probe_config::ConfigDiscovery;
///
/// let discovery = ConfigDiscovery::new(".");
/// let path = discovery.find();
/// ```
pub struct ConfigDiscovery {
    root: PathBuf,
}

impl ConfigDiscovery {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Returns `<root>/spa-probe.toml` if it exists.
    pub fn find(&self) -> Option<PathBuf> {
        let path = self.root.join(CONFIG_FILE);
        path.is_file().then_some(path)
    }
}

/// Builds the figment for one load.
pub struct ConfigLoader {
    root: PathBuf,
    file: Option<PathBuf>,
    env: bool,
}

impl ConfigLoader {
    /// Discovers the config file under `root` and reads the environment.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            file: None,
            env: true,
        }
    }

    /// Uses `path` instead of discovery. The file must exist.
    #[must_use]
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Ignores environment variables.
    #[must_use]
    pub fn without_env(mut self) -> Self {
        self.env = false;
        self
    }

    /// The merged provider stack, before extraction.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NotFound` if an explicit file is missing.
    pub fn figment(&self) -> Result<Figment> {
        let mut figment = Figment::new().merge(Serialized::defaults(HarnessConfig::default()));

        let file = match &self.file {
            Some(path) if path.is_file() => Some(path.clone()),
            Some(path) => return Err(ConfigError::NotFound(path.clone())),
            None => ConfigDiscovery::new(&self.root).find(),
        };
        if let Some(path) = file {
            debug!(path = %path.display(), "loading config file");
            figment = figment.merge(Toml::file(path));
        }

        if self.env {
            figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
            figment = merge_compat_env(figment, |key| std::env::var(key).ok());
        }

        Ok(figment)
    }

    /// Extracts and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing explicit file and `InvalidValue` for
    /// malformed or out-of-range settings.
    pub fn load(&self) -> Result<HarnessConfig> {
        let config: HarnessConfig = self.figment()?.extract()?;
        config.validate()?;
        Ok(config)
    }
}

fn merge_compat_env(mut figment: Figment, lookup: impl Fn(&str) -> Option<String>) -> Figment {
    match lookup("BASE_URL") {
        Some(url) if url.trim().is_empty() => warn!("ignoring blank BASE_URL"),
        Some(url) => figment = figment.merge(Serialized::default("base_url", url)),
        None => {}
    }
    if let Some(ci) = lookup("CI") {
        figment = figment.merge(Serialized::default("ci", truthy(&ci)));
    }
    if let Some(debug) = lookup("DEBUG") {
        figment = figment.merge(Serialized::default("verbose", truthy(&debug)));
    }
    figment
}

fn truthy(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}

/// Load from the current directory with environment overrides.
///
/// ```no_run
/// let config = spa_probe_config::discover().unwrap();
/// ```
pub fn discover() -> Result<HarnessConfig> {
    let root = std::env::current_dir()?;
    ConfigLoader::new(root).load()
}

/// Load from an explicit file, or discover when `path` is `None`.
pub fn load(path: Option<&Path>) -> Result<HarnessConfig> {
    let root = std::env::current_dir()?;
    let loader = ConfigLoader::new(root);
    match path {
        Some(path) => loader.file(path).load(),
        None => loader.load(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn extract(vars: &[(&str, &str)]) -> HarnessConfig {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        let figment = Figment::new().merge(Serialized::defaults(HarnessConfig::default()));
        merge_compat_env(figment, |key| vars.get(key).cloned()).extract().unwrap()
    }

    #[test]
    fn compat_variables_override_defaults() {
        let config = extract(&[("BASE_URL", "http://staging:9000/app"), ("CI", "true"), ("DEBUG", "pw:api")]);
        assert_eq!(config.base_url, "http://staging:9000/app");
        assert!(config.ci);
        assert!(config.verbose);
    }

    #[test]
    fn falsy_compat_values() {
        let config = extract(&[("CI", "0"), ("DEBUG", "false"), ("BASE_URL", " ")]);
        assert!(!config.ci);
        assert!(!config.verbose);
        assert_eq!(config.base_url, crate::config::DEFAULT_BASE_URL);
    }

    #[test]
    fn truthy_values() {
        for value in ["1", "true", "TRUE", "yes", "pw:*"] {
            assert!(truthy(value), "{value}");
        }
        for value in ["", "0", "false", "No", "off"] {
            assert!(!truthy(value), "{value}");
        }
    }
}
