//! Error handling for the CLI.
//!
//! Commands return [`CliError`]; `main` turns it into a miette report so
//! the diagnostic report path shows up as help text under the failure.

use miette::Report;
use spa_probe::ProbeError;
use thiserror::Error;

/// Top-level CLI error type.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(#[from] spa_probe_config::ConfigError),

    /// The harness failed
    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// Invalid command-line arguments or options
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Every probed endpoint failed
    #[error("Back end unreachable at {0}")]
    BackendDown(String),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for CLI operations.
pub type Result<T> = std::result::Result<T, CliError>;

/// Convert a `CliError` to a miette report.
pub fn cli_error_to_miette(err: CliError) -> Report {
    match err {
        CliError::Probe(e) => probe_error_to_miette(&e),
        CliError::Config(e) => miette::miette!(
            help = "Check spa-probe.toml and SPA_PROBE_* environment variables",
            "Configuration error: {}",
            e
        ),
        _ => miette::miette!("{}", err),
    }
}

fn probe_error_to_miette(err: &ProbeError) -> Report {
    let kind = err.kind();
    match err.report_path() {
        Some(path) => miette::miette!(
            help = format!("Diagnostic report: {}", path.display()),
            "{kind}: {err}"
        ),
        None => miette::miette!("{kind}: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn report_path_becomes_help() {
        let err = CliError::Probe(ProbeError::NavigationTimeout {
            target: "http://localhost:8080/admin-next/".into(),
            pending: vec!["selector-present(#app)".into()],
            elapsed: Duration::from_secs(10),
            report: Some(PathBuf::from("probe-reports/diagnose/1")),
        });
        let report = cli_error_to_miette(err);
        let help = report.help().map(|h| h.to_string()).unwrap_or_default();
        assert!(help.contains("probe-reports/diagnose/1"));
        assert!(report.to_string().starts_with("NavigationTimeout"));
    }

    #[test]
    fn plain_errors_pass_through() {
        let report = cli_error_to_miette(CliError::InvalidArgument("unknown policy 'fast'".into()));
        assert_eq!(report.to_string(), "Invalid argument: unknown policy 'fast'");
    }
}
