//! Command implementations.
//!
//! - [`diagnose`] - load a page and write a diagnostic report
//! - [`probe`] - query the back end directly
//! - [`config`] - print the effective configuration

pub mod config;
pub mod diagnose;
pub mod probe;

use crate::cli::{Cli, Command};
use crate::error::Result;

/// Load the configuration once and dispatch to the selected command.
///
/// # Errors
///
/// Returns configuration errors and whatever the command returns.
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = spa_probe_config::load(cli.config.as_deref())?;
    if cli.verbose {
        config.verbose = true;
    }

    match cli.command {
        Command::Diagnose(args) => diagnose::execute(args, config).await,
        Command::Probe(args) => probe::execute(args, &config).await,
        Command::Config(args) => config::execute(&args, &config),
    }
}
