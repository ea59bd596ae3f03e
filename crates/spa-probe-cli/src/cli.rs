//! Command-line interface definition.
//!
//! - `spa-probe diagnose` - open the SPA in Chrome and write a diagnostic report
//! - `spa-probe probe` - query the back end directly
//! - `spa-probe config` - print the effective configuration

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// spa-probe - diagnostics for single-page applications under test
#[derive(Parser, Debug)]
#[command(
    name = "spa-probe",
    version,
    about = "Diagnose single-page applications in headless Chrome",
    long_about = "spa-probe opens a single-page application in headless Chrome, waits for it\n\
                  with a named readiness policy, and writes a diagnostic report with a\n\
                  screenshot, DOM snapshot, console output and network failures."
)]
pub struct Cli {
    /// Enable verbose logging and echo every captured page event
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Config file (default: ./spa-probe.toml when present)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load a page of the SPA and write a diagnostic report
    ///
    /// Always writes a report, whether or not the page became ready.
    /// Exits non-zero when it did not.
    Diagnose(DiagnoseArgs),

    /// Query the back-end health endpoints directly, bypassing the SPA
    Probe(ProbeArgs),

    /// Print the effective configuration
    Config(ConfigArgs),
}

/// Arguments for the diagnose command
#[derive(Args, Debug, Clone)]
pub struct DiagnoseArgs {
    /// Paths under the base URL, one session each
    #[arg(default_value = "/", value_name = "PATH")]
    pub paths: Vec<String>,

    /// Readiness policy from the shared catalog
    ///
    /// committed, dom-parsed, shell-mounted, slow-renderer or network-idle.
    #[arg(short, long, default_value = "shell-mounted", value_name = "NAME")]
    pub policy: String,

    /// Selector marking the mounted application shell
    #[arg(short, long, default_value = "#app", value_name = "SELECTOR")]
    pub selector: String,

    /// Let font and CDN requests reach the network
    #[arg(long)]
    pub no_mock_assets: bool,

    /// Base URL of the SPA, overriding the configuration
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,
}

/// Arguments for the probe command
#[derive(Args, Debug, Clone)]
pub struct ProbeArgs {
    /// Back-end URL, overriding `backend_url` from the configuration
    #[arg(long, value_name = "URL")]
    pub url: Option<String>,

    /// Endpoints to query instead of the defaults
    #[arg(short, long = "endpoint", value_name = "PATH")]
    pub endpoints: Vec<String>,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the config command
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Print as TOML instead of JSON
    #[arg(long)]
    pub toml: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn diagnose_defaults() {
        let cli = Cli::try_parse_from(["spa-probe", "diagnose"]).unwrap();
        let Command::Diagnose(args) = cli.command else {
            panic!("expected diagnose");
        };
        assert_eq!(args.paths, vec!["/"]);
        assert_eq!(args.policy, "shell-mounted");
        assert_eq!(args.selector, "#app");
        assert!(!args.no_mock_assets);
    }

    #[test]
    fn diagnose_takes_several_paths() {
        let cli = Cli::try_parse_from(["spa-probe", "diagnose", "/login", "/settings", "-p", "network-idle"]).unwrap();
        let Command::Diagnose(args) = cli.command else {
            panic!("expected diagnose");
        };
        assert_eq!(args.paths, vec!["/login", "/settings"]);
        assert_eq!(args.policy, "network-idle");
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["spa-probe", "probe", "--verbose", "--config", "ci.toml", "-e", "/health"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("ci.toml")));
        let Command::Probe(args) = cli.command else {
            panic!("expected probe");
        };
        assert_eq!(args.endpoints, vec!["/health".to_string()]);
    }

    #[test]
    fn verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["spa-probe", "-v", "-q", "config"]).is_err());
    }
}
