//! spa-probe CLI.
//!
//! Runs the diagnostic harness outside a test runner:
//!
//! - [`cli`] - argument definitions
//! - [`commands`] - `diagnose`, `probe` and `config`
//! - [`error`] - `CliError` and its miette conversion
//! - [`logger`] - tracing setup
//! - [`ui`] - status messages

pub mod cli;
pub mod commands;
pub mod error;
pub mod logger;
pub mod ui;

pub use error::{CliError, Result};
