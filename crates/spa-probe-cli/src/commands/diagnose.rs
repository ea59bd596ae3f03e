//! Diagnose command implementation.
//!
//! Opens one session per page of the SPA, navigates under a catalog policy
//! and always leaves a report behind. Failed pages are retried in CI.

use crate::cli::DiagnoseArgs;
use crate::error::{CliError, Result};
use crate::ui;
use futures::{StreamExt, stream};
use spa_probe::{
    DiagnosticReport, FailureKind, Interceptor, ProbeError, ReadinessPolicy, SessionOptions,
    StaticUrlServer, TestBrowser,
};
use spa_probe_config::HarnessConfig;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Everything one page run needs, shared by all pages of the command.
struct Plan<'a> {
    browser: &'a TestBrowser,
    config: &'a HarnessConfig,
    server: &'a StaticUrlServer,
    policy: &'a ReadinessPolicy,
    interceptor: &'a Interceptor,
}

/// Execute the diagnose command.
///
/// # Errors
///
/// Returns the first harness failure (with its report path) among pages
/// that never became ready, and configuration or launch errors before that.
pub async fn execute(args: DiagnoseArgs, mut config: HarnessConfig) -> Result<()> {
    if let Some(url) = &args.base_url {
        config.base_url.clone_from(url);
        config.validate()?;
    }
    if args.headed {
        config.headless = false;
    }

    let policy = resolve_policy(&args.policy, &args.selector)?.bounded_by(config.navigation_timeout());
    policy.validate()?;
    let interceptor = if args.no_mock_assets {
        Interceptor::new()
    } else {
        Interceptor::external_assets()?
    };
    let server = StaticUrlServer::new(config.base_url.clone());
    let workers = worker_count(&config, args.paths.len());

    ui::info(&format!(
        "Opening {} page(s) under {} ({workers} at a time, {} retries)",
        args.paths.len(),
        policy.name,
        config.retries()
    ));

    let browser = TestBrowser::from_config(&config).await?;
    let plan = Plan {
        browser: &browser,
        config: &config,
        server: &server,
        policy: &policy,
        interceptor: &interceptor,
    };
    let results: Vec<(String, spa_probe::Result<PathBuf>)> = stream::iter(&args.paths)
        .map(|path| {
            let plan = &plan;
            async move { (path.clone(), diagnose_with_retries(plan, path).await) }
        })
        .buffered(workers)
        .collect()
        .await;
    if let Err(e) = browser.close().await {
        warn!(error = %e, "browser did not close cleanly");
    }

    let mut first_failure = None;
    for (path, result) in results {
        match result {
            Ok(report) => {
                ui::success(&format!("{path}: page ready"));
                print_report(&report)?;
            }
            Err(e) => {
                ui::error(&format!("{path}: {e}"));
                if let Some(report) = e.report_path() {
                    if let Err(print_err) = print_report(report) {
                        warn!(error = %print_err, "could not read back the report");
                    }
                }
                if first_failure.is_none() {
                    first_failure = Some(e);
                }
            }
        }
    }

    match first_failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

pub(crate) fn resolve_policy(name: &str, selector: &str) -> Result<ReadinessPolicy> {
    ReadinessPolicy::by_name(name, selector).ok_or_else(|| {
        CliError::InvalidArgument(format!(
            "unknown readiness policy '{name}' (known: {})",
            ReadinessPolicy::catalog_names().join(", ")
        ))
    })
}

/// Pages diagnosed at once: the configured worker count, else all of them.
fn worker_count(config: &HarnessConfig, pages: usize) -> usize {
    config.workers().unwrap_or(pages).max(1)
}

/// Timeouts and crashes are worth another attempt; a rejected navigation is not.
fn is_retryable(err: &ProbeError) -> bool {
    matches!(err.kind(), FailureKind::NavigationTimeout | FailureKind::CrashDetected)
}

async fn diagnose_with_retries(plan: &Plan<'_>, path: &str) -> spa_probe::Result<PathBuf> {
    let retries = plan.config.retries();
    let mut attempt = 0;
    loop {
        match diagnose(plan, path, attempt).await {
            Err(e) if attempt < retries && is_retryable(&e) => {
                attempt += 1;
                ui::warning(&format!("{path}: {} on attempt {attempt}, retrying", e.kind()));
            }
            result => return result,
        }
    }
}

async fn diagnose(plan: &Plan<'_>, path: &str, attempt: u32) -> spa_probe::Result<PathBuf> {
    let name = match attempt {
        0 => format!("diagnose {path}"),
        n => format!("diagnose {path} retry {n}"),
    };
    let options = SessionOptions::from_config(plan.config, name)?;
    let mut session = plan.browser.open_session(options, plan.interceptor.clone()).await?;

    match session.navigate_to(plan.server, path, plan.policy).await {
        Ok(outcome) => {
            session.flush_events().await;
            let captured = session.capture(format!("diagnose: {outcome}")).await;
            session.close().await;
            captured
        }
        Err(e) => {
            session.close().await;
            Err(e)
        }
    }
}

fn print_report(path: &Path) -> Result<()> {
    let report = DiagnosticReport::load(path)?;
    println!("{}", report.summary());
    println!("report: {}", path.display());
    Ok(())
}
