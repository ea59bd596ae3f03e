//! Logging setup for the CLI.
//!
//! Verbosity is resolved in this order:
//! 1. `--verbose`: DEBUG for spa-probe crates, plus echoed page events
//! 2. `--quiet`: errors only
//! 3. `RUST_LOG`
//! 4. INFO for spa-probe crates

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const VERBOSE_FILTER: &str = "spa_probe=debug,spa_probe_config=debug,spa_probe_cli=debug";
const QUIET_FILTER: &str = "spa_probe=error,spa_probe_config=warn,spa_probe_cli=error";
const DEFAULT_FILTER: &str = "spa_probe=info,spa_probe_config=info,spa_probe_cli=info";

/// Picks the filter for the given flags.
pub fn filter_for(verbose: bool, quiet: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else if quiet {
        EnvFilter::new(QUIET_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Initialize the global tracing subscriber. Call once, before any logging.
///
/// ```rust,no_run
/// spa_probe_cli::logger::init_logger(false, false, false);
/// ```
pub fn init_logger(verbose: bool, quiet: bool, no_color: bool) {
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose) // event echo lines are tagged by target
        .with_level(true)
        .with_ansi(!no_color)
        .compact();

    tracing_subscriber::registry()
        .with(filter_for(verbose, quiet))
        .with(fmt_layer)
        .init();
}
