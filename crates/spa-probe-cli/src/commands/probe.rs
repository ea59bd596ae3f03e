//! Probe command implementation.

use crate::cli::ProbeArgs;
use crate::error::{CliError, Result};
use crate::ui;
use spa_probe::BackendProbe;
use spa_probe_config::HarnessConfig;

/// Execute the probe command.
///
/// Prints one line per endpoint (or a JSON array with `--json`).
///
/// # Errors
///
/// Fails when no back end is configured, or when no endpoint answered at all.
pub async fn execute(args: ProbeArgs, config: &HarnessConfig) -> Result<()> {
    let base = args
        .url
        .clone()
        .or_else(|| config.backend_url.clone())
        .ok_or_else(|| {
            CliError::InvalidArgument("no back end configured: set backend_url or pass --url".to_string())
        })?;

    let mut probe = BackendProbe::new(base.clone(), config.action_timeout())?;
    if !args.endpoints.is_empty() {
        probe = probe.with_endpoints(args.endpoints.iter().cloned());
    }

    let results = probe.run().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for status in &results {
            if status.is_success() {
                ui::success(&status.to_string());
            } else {
                ui::warning(&status.to_string());
            }
            println!("{status}");
        }
    }

    if results.iter().all(|s| s.status.is_none()) {
        return Err(CliError::BackendDown(base));
    }
    Ok(())
}
