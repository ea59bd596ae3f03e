//! Config command implementation.

use crate::cli::ConfigArgs;
use crate::error::Result;
use spa_probe_config::HarnessConfig;

/// Print the effective configuration to stdout.
pub fn execute(args: &ConfigArgs, config: &HarnessConfig) -> Result<()> {
    if args.toml {
        print!("{}", config.to_toml()?);
    } else {
        println!("{}", serde_json::to_string_pretty(config)?);
    }
    Ok(())
}
