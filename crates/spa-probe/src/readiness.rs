//! Deciding when a navigated page is usable.
//!
//! A [`ReadinessPolicy`] names a set of [`ReadinessStrategy`]s and how they
//! compose: a race (first strategy to resolve wins) or an ordered fallback
//! chain. The policy is always chosen explicitly at the call site; the
//! [catalog](ReadinessPolicy::shell_mounted) gives the common ones a stable,
//! versioned name and a recorded rationale.
//!
//! [`ReadinessDetector`] runs a policy against one page. Every strategy is a
//! cancellable task bounded by its own timeout and by the policy deadline, and
//! every wait also watches the session lifecycle so a renderer crash ends it
//! immediately.

use crate::driver::PageDriver;
use crate::error::{ProbeError, Result};
use crate::recorder::NetworkActivity;
use crate::session::{Lifecycle, LifecycleCell};
use crate::wait::{WaitConfig, wait_for_result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep, sleep_until, timeout, timeout_at};
use tracing::debug;

/// Budget for each best-effort probe of partial state after a timeout.
const PARTIAL_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// A named readiness condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// The browser committed the navigation. Fastest, says nothing about rendering.
    Commit,
    /// `document.readyState` left `loading`.
    DomContentLoaded,
    /// No request started or finished for `quiet`.
    NetworkQuiescent {
        /// Required silence
        quiet: Duration,
    },
    /// A CSS selector matches an element in the rendered tree.
    SelectorPresent(String),
    /// Resolves unconditionally after the given duration.
    ///
    /// Last resort only, for environments where no other signal is
    /// reliable. It proves nothing about the page.
    FixedDelay(Duration),
}

impl Strategy {
    /// Stable identifier used in outcomes and error messages.
    #[must_use]
    pub fn id(&self) -> String {
        match self {
            Strategy::Commit => "commit".to_string(),
            Strategy::DomContentLoaded => "domcontentloaded".to_string(),
            Strategy::NetworkQuiescent { quiet } => format!("network-quiescent({}ms)", quiet.as_millis()),
            Strategy::SelectorPresent(selector) => format!("selector-present({selector})"),
            Strategy::FixedDelay(delay) => format!("fixed-delay({}ms)", delay.as_millis()),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

/// A strategy bounded by its own timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessStrategy {
    /// The condition
    pub strategy: Strategy,
    /// Upper bound for this strategy alone
    pub timeout: Duration,
}

impl ReadinessStrategy {
    /// Pairs a strategy with its timeout.
    #[must_use]
    pub fn new(strategy: Strategy, timeout: Duration) -> Self {
        Self { strategy, timeout }
    }

    /// Shorthand for a selector-present strategy.
    #[must_use]
    pub fn selector(selector: impl Into<String>, timeout: Duration) -> Self {
        Self::new(Strategy::SelectorPresent(selector.into()), timeout)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.timeout.is_zero() {
            return Err(format!("strategy {} has a zero timeout", self.strategy));
        }
        match &self.strategy {
            Strategy::NetworkQuiescent { quiet } if quiet.is_zero() => {
                Err("network quiet window must be non-zero".to_string())
            }
            Strategy::NetworkQuiescent { quiet } if *quiet >= self.timeout => Err(format!(
                "quiet window {quiet:?} must be shorter than its timeout {:?}",
                self.timeout
            )),
            Strategy::SelectorPresent(selector) if selector.trim().is_empty() => {
                Err("selector must not be empty".to_string())
            }
            Strategy::FixedDelay(delay) if *delay >= self.timeout => Err(format!(
                "fixed delay {delay:?} can never finish within its timeout {:?}",
                self.timeout
            )),
            _ => Ok(()),
        }
    }
}

/// How a policy combines its strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Composition {
    /// Run all strategies at once; the first to resolve wins
    Race,
    /// Try strategies one after another until one resolves
    Fallback,
}

/// A composed, named set of readiness strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Versioned name, e.g. `shell-mounted@1`
    pub name: String,
    /// Race or fallback
    pub composition: Composition,
    /// Strategies in declaration order
    pub strategies: Vec<ReadinessStrategy>,
    /// Hard bound for the whole navigation, commit included
    pub timeout: Duration,
    /// Why this combination suits its call sites
    pub rationale: String,
}

impl ReadinessPolicy {
    /// Starts an empty racing policy.
    #[must_use]
    pub fn race(name: impl Into<String>, timeout: Duration) -> Self {
        Self::empty(name, Composition::Race, timeout)
    }

    /// Starts an empty fallback policy.
    #[must_use]
    pub fn fallback(name: impl Into<String>, timeout: Duration) -> Self {
        Self::empty(name, Composition::Fallback, timeout)
    }

    fn empty(name: impl Into<String>, composition: Composition, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            composition,
            strategies: Vec::new(),
            timeout,
            rationale: String::new(),
        }
    }

    /// Appends a strategy.
    #[must_use]
    pub fn with(mut self, strategy: Strategy, timeout: Duration) -> Self {
        self.strategies.push(ReadinessStrategy::new(strategy, timeout));
        self
    }

    /// Records the rationale.
    #[must_use]
    pub fn because(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    /// Caps the whole-navigation deadline at `limit`.
    ///
    /// A configured navigation timeout shortens catalog policies but never
    /// lengthens them.
    #[must_use]
    pub fn bounded_by(mut self, limit: Duration) -> Self {
        self.timeout = self.timeout.min(limit);
        self
    }

    /// Identifiers of all strategies, in order.
    #[must_use]
    pub fn strategy_ids(&self) -> Vec<String> {
        self.strategies.iter().map(|s| s.strategy.id()).collect()
    }

    /// Checks the policy can run as configured.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidPolicy`] for empty policies, zero
    /// timeouts, quiet windows not shorter than their timeout, empty
    /// selectors, and fixed delays that cannot finish in time.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| ProbeError::InvalidPolicy {
            policy: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("policy name must not be empty".to_string()));
        }
        if self.strategies.is_empty() {
            return Err(invalid("policy has no strategies".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(invalid("policy timeout must be non-zero".to_string()));
        }
        for strategy in &self.strategies {
            strategy.validate().map_err(invalid)?;
        }
        Ok(())
    }

    /// `committed@1`: resolve on commit.
    ///
    /// For applications known to render slowly, where the test's own
    /// assertions do the functional waiting.
    #[must_use]
    pub fn committed() -> Self {
        Self::race("committed@1", Duration::from_secs(30))
            .with(Strategy::Commit, Duration::from_secs(30))
            .because("slow application: commit is the only signal that arrives reliably, assertions wait for content")
    }

    /// `dom-parsed@1`: resolve once the document finished parsing.
    #[must_use]
    pub fn dom_parsed() -> Self {
        Self::race("dom-parsed@1", Duration::from_secs(30))
            .with(Strategy::DomContentLoaded, Duration::from_secs(30))
            .because("static pages: structural parse is enough to assert on markup")
    }

    /// `shell-mounted@1`: network quiescent OR `selector` present, 10 s.
    ///
    /// The selector usually wins on applications that poll the back end
    /// continuously; quiescence wins on pages without a shell.
    #[must_use]
    pub fn shell_mounted(selector: impl Into<String>) -> Self {
        Self::race("shell-mounted@1", Duration::from_secs(10))
            .with(
                Strategy::NetworkQuiescent {
                    quiet: Duration::from_millis(500),
                },
                Duration::from_secs(10),
            )
            .with(Strategy::SelectorPresent(selector.into()), Duration::from_secs(10))
            .because("functional readiness: shell mount or network silence, whichever comes first, bounded at 10s")
    }

    /// `slow-renderer@1`: DOM parsed, then the selector, then a fixed delay.
    #[must_use]
    pub fn slow_renderer(selector: impl Into<String>) -> Self {
        Self::fallback("slow-renderer@1", Duration::from_secs(60))
            .with(Strategy::DomContentLoaded, Duration::from_secs(20))
            .with(Strategy::SelectorPresent(selector.into()), Duration::from_secs(20))
            .with(Strategy::FixedDelay(Duration::from_secs(5)), Duration::from_secs(6))
            .because("renderer that is slow and sometimes crashes: degrade through weaker signals instead of failing early")
    }

    /// `network-idle@1`: network quiescent only.
    #[must_use]
    pub fn network_idle() -> Self {
        Self::race("network-idle@1", Duration::from_secs(30))
            .with(
                Strategy::NetworkQuiescent {
                    quiet: Duration::from_millis(500),
                },
                Duration::from_secs(30),
            )
            .because("pages without background polling: silence means all assets arrived")
    }

    /// Looks up a catalog policy by name (with or without version suffix).
    ///
    /// `selector` is used by the policies that need one.
    #[must_use]
    pub fn by_name(name: &str, selector: &str) -> Option<Self> {
        let base = name.split('@').next().unwrap_or(name);
        let policy = match base {
            "committed" => Self::committed(),
            "dom-parsed" => Self::dom_parsed(),
            "shell-mounted" => Self::shell_mounted(selector),
            "slow-renderer" => Self::slow_renderer(selector),
            "network-idle" => Self::network_idle(),
            _ => return None,
        };
        (name == base || name == policy.name).then_some(policy)
    }

    /// Names of all catalog policies.
    #[must_use]
    pub fn catalog_names() -> &'static [&'static str] {
        &["committed@1", "dom-parsed@1", "shell-mounted@1", "slow-renderer@1", "network-idle@1"]
    }
}

/// Best-effort page state captured when readiness timed out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialState {
    /// Page URL, if it could be read
    pub url: Option<String>,
    /// `document.readyState`, if it could be read
    pub ready_state: Option<String>,
}

/// Result of running a readiness policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ReadinessOutcome {
    /// A strategy resolved.
    #[serde(rename_all = "camelCase")]
    Ready {
        /// Id of the winning strategy
        strategy: String,
        /// Time from navigation start
        #[serde(with = "millis", rename = "elapsedMs")]
        elapsed: Duration,
    },
    /// The policy deadline passed, or every strategy gave up.
    #[serde(rename_all = "camelCase")]
    TimedOut {
        /// Strategies that never resolved
        pending: Vec<String>,
        /// Time from navigation start
        #[serde(with = "millis", rename = "elapsedMs")]
        elapsed: Duration,
        /// What the page looked like at that point
        partial: PartialState,
    },
    /// The renderer crashed before any strategy resolved.
    #[serde(rename_all = "camelCase")]
    Crashed {
        /// Time from navigation start
        #[serde(with = "millis", rename = "elapsedMs")]
        elapsed: Duration,
    },
}

impl fmt::Display for ReadinessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessOutcome::Ready { strategy, elapsed } => write!(f, "ready via {strategy} after {elapsed:?}"),
            ReadinessOutcome::TimedOut { pending, elapsed, partial } => {
                write!(f, "timed out after {elapsed:?} (pending: {})", pending.join(", "))?;
                if let Some(state) = &partial.ready_state {
                    write!(f, ", readyState {state}")?;
                }
                Ok(())
            }
            ReadinessOutcome::Crashed { elapsed } => write!(f, "crashed after {elapsed:?}"),
        }
    }
}

impl ReadinessOutcome {
    /// True for [`ReadinessOutcome::Ready`].
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadinessOutcome::Ready { .. })
    }

    /// Time spent.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        match self {
            ReadinessOutcome::Ready { elapsed, .. }
            | ReadinessOutcome::TimedOut { elapsed, .. }
            | ReadinessOutcome::Crashed { elapsed } => *elapsed,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Runs readiness policies against one page.
#[derive(Debug, Clone)]
pub struct ReadinessDetector {
    driver: Arc<dyn PageDriver>,
    network: watch::Receiver<NetworkActivity>,
    lifecycle: LifecycleCell,
}

impl ReadinessDetector {
    /// Creates a detector for the page behind `driver`.
    #[must_use]
    pub fn new(
        driver: Arc<dyn PageDriver>,
        network: watch::Receiver<NetworkActivity>,
        lifecycle: LifecycleCell,
    ) -> Self {
        Self {
            driver,
            network,
            lifecycle,
        }
    }

    /// Navigates to `target` and waits until `policy` is satisfied.
    ///
    /// The policy timeout covers the commit as well as the strategies.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidPolicy`] for unusable policies and
    /// [`ProbeError::NavigationFailed`] when the browser rejects the
    /// navigation. Timeouts and crashes are outcomes, not errors.
    pub async fn navigate_and_wait(&self, target: &str, policy: &ReadinessPolicy) -> Result<ReadinessOutcome> {
        policy.validate()?;
        let start = Instant::now();
        let deadline = start + policy.timeout;
        debug!(target, policy = %policy.name, "navigating");

        let crash = crashed(self.lifecycle.subscribe());
        tokio::pin!(crash);

        tokio::select! {
            biased;
            () = &mut crash => return Ok(ReadinessOutcome::Crashed { elapsed: start.elapsed() }),
            committed = timeout_at(deadline, self.driver.navigate(target)) => match committed {
                Ok(Ok(())) => {}
                Ok(Err(_)) if self.lifecycle.get() == Lifecycle::Crashed => {
                    return Ok(ReadinessOutcome::Crashed { elapsed: start.elapsed() });
                }
                Ok(Err(ProbeError::NavigationFailed { url, reason, report })) => {
                    return Err(ProbeError::NavigationFailed { url, reason, report });
                }
                Ok(Err(e)) => {
                    return Err(ProbeError::NavigationFailed {
                        url: target.to_string(),
                        reason: e.to_string(),
                        report: None,
                    });
                }
                Err(_) => return Ok(self.timed_out(policy, start).await),
            },
        }

        self.run(policy, start, deadline).await
    }

    /// Waits for `policy` on the page as it is now, without navigating.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidPolicy`] for unusable policies.
    pub async fn wait(&self, policy: &ReadinessPolicy) -> Result<ReadinessOutcome> {
        policy.validate()?;
        let start = Instant::now();
        self.run(policy, start, start + policy.timeout).await
    }

    async fn run(&self, policy: &ReadinessPolicy, start: Instant, deadline: Instant) -> Result<ReadinessOutcome> {
        let outcome = match policy.composition {
            Composition::Race => self.race(policy, start, deadline).await,
            Composition::Fallback => self.fallback(policy, start, deadline).await,
        };
        debug!(policy = %policy.name, ?outcome, "readiness settled");
        Ok(outcome)
    }

    async fn race(&self, policy: &ReadinessPolicy, start: Instant, deadline: Instant) -> ReadinessOutcome {
        let mut tasks = JoinSet::new();
        for strategy in &policy.strategies {
            let driver = self.driver.clone();
            let network = self.network.clone();
            let strategy = strategy.clone();
            tasks.spawn(async move {
                let result = run_strategy(driver.as_ref(), network, &strategy.strategy, strategy.timeout).await;
                (strategy.strategy.id(), result)
            });
        }

        let crash = crashed(self.lifecycle.subscribe());
        tokio::pin!(crash);

        loop {
            tokio::select! {
                biased;
                () = &mut crash => return ReadinessOutcome::Crashed { elapsed: start.elapsed() },
                () = sleep_until(deadline) => break,
                joined = tasks.join_next() => match joined {
                    Some(Ok((id, Ok(())))) => {
                        return ReadinessOutcome::Ready { strategy: id, elapsed: start.elapsed() };
                    }
                    Some(Ok((id, Err(e)))) => debug!(strategy = %id, error = %e, "strategy gave up"),
                    Some(Err(e)) => debug!(error = %e, "strategy task failed"),
                    None => break,
                },
            }
        }

        // dropping the set aborts strategies still running
        drop(tasks);
        self.timed_out(policy, start).await
    }

    async fn fallback(&self, policy: &ReadinessPolicy, start: Instant, deadline: Instant) -> ReadinessOutcome {
        let crash = crashed(self.lifecycle.subscribe());
        tokio::pin!(crash);

        for strategy in &policy.strategies {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let limit = strategy.timeout.min(remaining);
            let attempt = timeout_at(
                Instant::now() + limit,
                run_strategy(self.driver.as_ref(), self.network.clone(), &strategy.strategy, limit),
            );

            tokio::select! {
                biased;
                () = &mut crash => return ReadinessOutcome::Crashed { elapsed: start.elapsed() },
                result = attempt => match result {
                    Ok(Ok(())) => {
                        return ReadinessOutcome::Ready {
                            strategy: strategy.strategy.id(),
                            elapsed: start.elapsed(),
                        };
                    }
                    Ok(Err(e)) => debug!(strategy = %strategy.strategy, error = %e, "falling back"),
                    Err(_) => debug!(strategy = %strategy.strategy, ?limit, "attempt hung, falling back"),
                },
            }
        }

        self.timed_out(policy, start).await
    }

    async fn timed_out(&self, policy: &ReadinessPolicy, start: Instant) -> ReadinessOutcome {
        let elapsed = start.elapsed();
        let url = timeout(PARTIAL_PROBE_TIMEOUT, self.driver.current_url()).await.ok().and_then(|r| r.ok());
        let ready_state = timeout(PARTIAL_PROBE_TIMEOUT, self.driver.ready_state())
            .await
            .ok()
            .and_then(|r| r.ok());

        ReadinessOutcome::TimedOut {
            pending: policy.strategy_ids(),
            elapsed,
            partial: PartialState { url, ready_state },
        }
    }
}

/// Resolves once the lifecycle reaches `crashed`; never resolves otherwise.
async fn crashed(mut lifecycle: watch::Receiver<Lifecycle>) {
    if lifecycle.wait_for(|state| *state == Lifecycle::Crashed).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn run_strategy(
    driver: &dyn PageDriver,
    network: watch::Receiver<NetworkActivity>,
    strategy: &Strategy,
    limit: Duration,
) -> Result<()> {
    let config = WaitConfig::with_timeout(limit);
    match strategy {
        Strategy::Commit => Ok(()),
        Strategy::DomContentLoaded => {
            wait_for_result(
                move || async move {
                    let state = driver.ready_state().await?;
                    Ok(state == "interactive" || state == "complete")
                },
                config,
                "domcontentloaded",
            )
            .await
        }
        Strategy::SelectorPresent(selector) => {
            let description = strategy.id();
            wait_for_result(move || driver.selector_present(selector), config, &description).await
        }
        Strategy::FixedDelay(delay) => {
            if *delay > limit {
                sleep(limit).await;
                return Err(ProbeError::WaitTimeout {
                    condition: strategy.id(),
                    timeout: limit,
                });
            }
            sleep(*delay).await;
            Ok(())
        }
        Strategy::NetworkQuiescent { quiet } => {
            timeout(limit, network_quiet(network, *quiet))
                .await
                .map_err(|_| ProbeError::WaitTimeout {
                    condition: strategy.id(),
                    timeout: limit,
                })
        }
    }
}

/// Resolves once nothing is in flight and nothing happened for `quiet`,
/// counting from whichever is later: the last activity or the call itself.
async fn network_quiet(mut network: watch::Receiver<NetworkActivity>, quiet: Duration) {
    let started = Instant::now();
    loop {
        let activity = *network.borrow_and_update();
        if activity.in_flight == 0 {
            let quiet_until = activity.last_activity.max(started) + quiet;
            if Instant::now() >= quiet_until {
                return;
            }
            tokio::select! {
                () = sleep_until(quiet_until) => {}
                changed = network.changed() => {
                    if changed.is_err() {
                        sleep_until(quiet_until).await;
                        return;
                    }
                }
            }
        } else if network.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_policies_are_valid() {
        for name in ReadinessPolicy::catalog_names() {
            let policy = ReadinessPolicy::by_name(name, "#app").unwrap();
            assert_eq!(&policy.name, name);
            policy.validate().unwrap();
            assert!(!policy.rationale.is_empty());
        }
    }

    #[test]
    fn lookup_accepts_unversioned_names_only_for_current_version() {
        assert!(ReadinessPolicy::by_name("shell-mounted", "#app").is_some());
        assert!(ReadinessPolicy::by_name("shell-mounted@1", "#app").is_some());
        assert!(ReadinessPolicy::by_name("shell-mounted@7", "#app").is_none());
        assert!(ReadinessPolicy::by_name("eventually", "#app").is_none());
    }

    #[test]
    fn shell_mounted_races_quiescence_and_selector() {
        let policy = ReadinessPolicy::shell_mounted("#app");
        assert_eq!(policy.composition, Composition::Race);
        assert_eq!(policy.timeout, Duration::from_secs(10));
        assert_eq!(
            policy.strategy_ids(),
            vec!["network-quiescent(500ms)", "selector-present(#app)"]
        );
    }

    #[test]
    fn configured_limit_only_shortens_policies() {
        let policy = ReadinessPolicy::shell_mounted("#app");
        assert_eq!(policy.clone().bounded_by(Duration::from_secs(3)).timeout, Duration::from_secs(3));
        assert_eq!(policy.clone().bounded_by(Duration::from_secs(60)).timeout, policy.timeout);
        assert_eq!(policy.bounded_by(Duration::from_secs(3)).strategies.len(), 2);
    }

    #[test]
    fn validation_rejects_unusable_policies() {
        let empty = ReadinessPolicy::race("empty@1", Duration::from_secs(1));
        assert!(matches!(empty.validate(), Err(ProbeError::InvalidPolicy { .. })));

        let zero = ReadinessPolicy::race("zero@1", Duration::ZERO).with(Strategy::Commit, Duration::from_secs(1));
        assert!(zero.validate().is_err());

        let quiet = ReadinessPolicy::race("quiet@1", Duration::from_secs(5)).with(
            Strategy::NetworkQuiescent {
                quiet: Duration::from_secs(2),
            },
            Duration::from_secs(2),
        );
        let err = quiet.validate().unwrap_err();
        assert!(err.to_string().contains("quiet window"));

        let blank = ReadinessPolicy::race("blank@1", Duration::from_secs(5))
            .with(Strategy::SelectorPresent("  ".into()), Duration::from_secs(1));
        assert!(blank.validate().is_err());
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let outcome = ReadinessOutcome::TimedOut {
            pending: vec!["selector-present(#app)".into()],
            elapsed: Duration::from_millis(1500),
            partial: PartialState {
                url: Some("http://localhost/".into()),
                ready_state: None,
            },
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "timedOut");
        assert_eq!(value["elapsedMs"], 1500);
        assert_eq!(value["partial"]["url"], "http://localhost/");

        let back: ReadinessOutcome = serde_json::from_value(value).unwrap();
        assert_eq!(back, outcome);
    }

    #[tokio::test(start_paused = true)]
    async fn network_quiet_waits_for_in_flight_requests() {
        let (tx, rx) = watch::channel(NetworkActivity {
            in_flight: 1,
            last_activity: Instant::now(),
            total: 1,
        });
        let start = Instant::now();
        let waiter = tokio::spawn(network_quiet(rx, Duration::from_millis(500)));

        sleep(Duration::from_secs(2)).await;
        assert!(!waiter.is_finished());

        tx.send_modify(|n| {
            n.in_flight = 0;
            n.last_activity = Instant::now();
        });
        waiter.await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(2500));
    }
}
