//! spa-probe - diagnostics for single-page applications under test.

use clap::Parser;
use miette::Result;
use spa_probe_cli::{cli, commands, error, logger, ui};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    logger::init_logger(args.verbose, args.quiet, args.no_color);
    ui::init_colors(args.no_color);

    commands::run(args).await.map_err(error::cli_error_to_miette)
}
