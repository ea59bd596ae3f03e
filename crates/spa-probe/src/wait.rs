//! Polling primitives shared by readiness strategies and post-load waits.
//!
//! Conditions are async closures re-evaluated on a fixed interval until they
//! hold or the timeout expires. Time is read from `tokio::time`, so waits
//! honour a paused test clock.

use crate::error::{ProbeError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout_at};

/// Default poll interval for checking conditions (100ms).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Timeout and poll interval for one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    /// Maximum time to wait for the condition.
    pub timeout: Duration,

    /// How often to check if the condition is satisfied.
    pub poll_interval: Duration,
}

impl WaitConfig {
    /// Creates a new wait configuration.
    #[must_use]
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// Creates a config with custom timeout and default poll interval.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(timeout, DEFAULT_POLL_INTERVAL)
    }
}

/// Waits for a fallible condition.
///
/// Errors from the condition count as "not yet": a page that is still
/// loading often rejects DOM probes for a moment.
///
/// # Errors
///
/// Returns [`ProbeError::WaitTimeout`] when the condition never held.
pub async fn wait_for_result<F, Fut>(condition: F, config: WaitConfig, description: &str) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let condition = &condition;
    poll_until(
        move || async move { matches!(condition().await, Ok(true)).then_some(()) },
        config,
        description,
    )
    .await
}

/// Polls until `probe` yields a value and returns it.
///
/// # Errors
///
/// Returns [`ProbeError::WaitTimeout`] when the probe never produced one.
pub async fn poll_until<T, F, Fut>(probe: F, config: WaitConfig, description: &str) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + config.timeout;

    let timed_out = || ProbeError::WaitTimeout {
        condition: description.to_string(),
        timeout: config.timeout,
    };

    loop {
        // a probe that never answers still ends on the deadline
        match timeout_at(deadline, probe()).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(_) => return Err(timed_out()),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(timed_out());
        }

        sleep(config.poll_interval.min(deadline - now)).await;
    }
}
