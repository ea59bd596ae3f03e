//! One browser page under test, from interception to teardown.
//!
//! A [`Session`] owns everything scoped to one test: the page driver, its
//! [`Interceptor`], its [`EventRecorder`] and its reporter. Nothing is shared
//! between sessions, so two tests running at once cannot see each other's
//! rules or events.
//!
//! # Lifecycle
//!
//! ```text
//! created -> intercepting -> navigating -> ready ------------------> closed
//!                                       -> timedOut -> reporting -> closed
//!            (any live state) -> crashed -------------> reporting -> closed
//! ```
//!
//! A crash preempts every other transition. Navigation timeouts, crashes,
//! rejected navigations and failed assertions all go through `reporting`:
//! the session captures a [`DiagnosticReport`](crate::report::DiagnosticReport),
//! closes itself, and returns the error with the report path attached.

use crate::driver::PageDriver;
use crate::error::{ProbeError, Result};
use crate::intercept::Interceptor;
use crate::readiness::{ReadinessDetector, ReadinessOutcome, ReadinessPolicy, ReadinessStrategy};
use crate::recorder::{EventCounts, EventLog, EventRecorder, RecorderOptions};
use crate::report::{CaptureContext, DiagnosticReporter, ReportReason, ReporterOptions};
use crate::server::{AppServer, BackendProbe};
use serde::{Deserialize, Serialize};
use spa_probe_config::{HarnessConfig, Viewport};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Lifecycle {
    /// Page exists, nothing installed yet
    Created,
    /// Interception and recording are active
    Intercepting,
    /// Navigation and readiness wait in progress
    Navigating,
    /// A readiness strategy resolved
    Ready,
    /// No readiness strategy resolved in time
    TimedOut,
    /// The renderer died
    Crashed,
    /// Capturing a diagnostic report
    Reporting,
    /// Torn down; terminal
    Closed,
}

impl Lifecycle {
    /// Returns true if the state machine allows `self -> to`.
    #[must_use]
    pub fn can_transition(self, to: Lifecycle) -> bool {
        use Lifecycle::{Closed, Crashed, Created, Intercepting, Navigating, Ready, Reporting, TimedOut};
        match (self, to) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Crashed, Reporting) => true,
            (Crashed | Reporting, Crashed) => false,
            (Crashed, _) => false,
            (_, Crashed) => true,
            (Created, Intercepting)
            | (Intercepting, Navigating)
            | (Navigating, Ready | TimedOut | Reporting)
            | (TimedOut | Ready, Reporting) => true,
            _ => false,
        }
    }

    /// True for `closed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Lifecycle::Closed
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lifecycle::Created => "created",
            Lifecycle::Intercepting => "intercepting",
            Lifecycle::Navigating => "navigating",
            Lifecycle::Ready => "ready",
            Lifecycle::TimedOut => "timedOut",
            Lifecycle::Crashed => "crashed",
            Lifecycle::Reporting => "reporting",
            Lifecycle::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Shared, observable lifecycle state of one session.
///
/// The recorder marks crashes through it and readiness waits subscribe to
/// it, so a crash interrupts whatever the session is waiting on.
#[derive(Debug, Clone)]
pub struct LifecycleCell {
    tx: Arc<watch::Sender<Lifecycle>>,
}

impl Default for LifecycleCell {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleCell {
    /// A cell in state `created`.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Lifecycle::Created);
        Self { tx: Arc::new(tx) }
    }

    /// Current state.
    #[must_use]
    pub fn get(&self) -> Lifecycle {
        *self.tx.borrow()
    }

    /// Receiver that observes every change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Lifecycle> {
        self.tx.subscribe()
    }

    /// Moves to `to`, returning the previous state.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidTransition`] when the edge is not allowed.
    pub fn advance(&self, to: Lifecycle) -> Result<Lifecycle> {
        let mut outcome = Err(Lifecycle::Created);
        self.tx.send_if_modified(|state| {
            if state.can_transition(to) {
                outcome = Ok(*state);
                *state = to;
                true
            } else {
                outcome = Err(*state);
                false
            }
        });

        match outcome {
            Ok(from) => {
                debug!(%from, %to, "lifecycle transition");
                Ok(from)
            }
            Err(from) => Err(ProbeError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            }),
        }
    }

    /// Marks the renderer as crashed unless the session is already
    /// crashed, reporting or closed. Returns true if the state changed.
    pub fn mark_crashed(&self) -> bool {
        let changed = self.tx.send_if_modified(|state| {
            if state.can_transition(Lifecycle::Crashed) {
                *state = Lifecycle::Crashed;
                true
            } else {
                false
            }
        });
        if changed {
            warn!("renderer crash detected");
        }
        changed
    }
}

/// Per-session settings.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Test identity; names the report directory
    pub test_name: String,
    /// Page viewport
    pub viewport: Viewport,
    /// Echo every event through `tracing`
    pub echo_events: bool,
    /// Root of all report directories
    pub reports_dir: PathBuf,
    /// Budget for each report artifact
    pub artifact_timeout: Duration,
    /// Back end probed into every report
    pub backend: Option<BackendProbe>,
}

impl SessionOptions {
    /// Defaults: 1280x720, no echo, reports under `probe-reports`, 5 s per artifact.
    #[must_use]
    pub fn new(test_name: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            viewport: Viewport::default(),
            echo_events: false,
            reports_dir: PathBuf::from("probe-reports"),
            artifact_timeout: Duration::from_secs(5),
            backend: None,
        }
    }

    /// Options derived from the harness configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the back-end probe client cannot be built.
    pub fn from_config(config: &HarnessConfig, test_name: impl Into<String>) -> Result<Self> {
        let backend = match &config.backend_url {
            Some(url) => Some(BackendProbe::new(url.clone(), config.artifact_timeout())?),
            None => None,
        };
        Ok(Self {
            test_name: test_name.into(),
            viewport: config.viewport,
            echo_events: config.verbose,
            reports_dir: config.reports_dir.clone(),
            artifact_timeout: config.artifact_timeout(),
            backend,
        })
    }

    /// Sets the reports root.
    #[must_use]
    pub fn reports_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.reports_dir = dir.into();
        self
    }

    /// Sets the viewport.
    #[must_use]
    pub fn viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = Viewport { width, height };
        self
    }

    /// Enables event echo.
    #[must_use]
    pub fn echo_events(mut self, echo: bool) -> Self {
        self.echo_events = echo;
        self
    }

    /// Sets the per-artifact budget.
    #[must_use]
    pub fn artifact_timeout(mut self, budget: Duration) -> Self {
        self.artifact_timeout = budget;
        self
    }

    /// Probes `backend` into every report.
    #[must_use]
    pub fn backend(mut self, backend: BackendProbe) -> Self {
        self.backend = Some(backend);
        self
    }
}

/// One isolated page under test.
#[derive(Debug)]
pub struct Session {
    id: String,
    test_name: String,
    driver: Arc<dyn PageDriver>,
    lifecycle: LifecycleCell,
    interceptor: Arc<Interceptor>,
    recorder: EventRecorder,
    detector: ReadinessDetector,
    reporter: DiagnosticReporter,
    readiness: Option<ReadinessOutcome>,
}

impl Session {
    /// Attaches the recorder, applies the viewport and installs `interceptor`.
    ///
    /// The session ends up `intercepting`, ready for one navigation.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver cannot be subscribed to or configured.
    pub async fn open(driver: Arc<dyn PageDriver>, options: SessionOptions, interceptor: Interceptor) -> Result<Self> {
        let id = uuid::Uuid::new_v4().to_string();
        let lifecycle = LifecycleCell::new();

        let mut recorder = EventRecorder::attach(
            driver.as_ref(),
            RecorderOptions {
                session_id: id.clone(),
                echo: options.echo_events,
            },
            lifecycle.clone(),
        )
        .await?;

        let installed = match driver
            .set_viewport(options.viewport.width, options.viewport.height)
            .await
        {
            Ok(()) => interceptor.install(driver.as_ref(), recorder.sink()).await,
            Err(e) => Err(e),
        };
        let interceptor = match installed {
            Ok(interceptor) => interceptor,
            Err(e) => {
                recorder.close().await;
                return Err(e);
            }
        };
        lifecycle.advance(Lifecycle::Intercepting)?;

        let detector = ReadinessDetector::new(driver.clone(), recorder.network_activity(), lifecycle.clone());
        let reporter = DiagnosticReporter::new(ReporterOptions {
            reports_dir: options.reports_dir,
            test_name: options.test_name.clone(),
            artifact_timeout: options.artifact_timeout,
            backend: options.backend,
        });

        info!(session = %id, test = %options.test_name, rules = interceptor.len(), "session opened");

        Ok(Self {
            id,
            test_name: options.test_name,
            driver,
            lifecycle,
            interceptor,
            recorder,
            detector,
            reporter,
            readiness: None,
        })
    }

    /// Unique session id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Test name this session was opened for.
    #[must_use]
    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.get()
    }

    /// The installed rules.
    #[must_use]
    pub fn interceptor(&self) -> &Interceptor {
        &self.interceptor
    }

    /// Outcome of the navigation, once it ran.
    #[must_use]
    pub fn readiness(&self) -> Option<&ReadinessOutcome> {
        self.readiness.as_ref()
    }

    /// Navigates to `target` and waits for `policy`.
    ///
    /// A session navigates once. On timeout, crash or a rejected navigation
    /// the session reports, closes, and returns the failure with the report
    /// path attached.
    ///
    /// # Errors
    ///
    /// [`ProbeError::NavigationTimeout`], [`ProbeError::CrashDetected`] and
    /// [`ProbeError::NavigationFailed`] (all with report);
    /// [`ProbeError::InvalidPolicy`] and [`ProbeError::InvalidTransition`]
    /// without one.
    pub async fn navigate(&mut self, target: &str, policy: &ReadinessPolicy) -> Result<ReadinessOutcome> {
        if self.lifecycle.get() == Lifecycle::Crashed {
            return Err(self.crash_failure().await);
        }
        policy.validate()?;
        self.lifecycle.advance(Lifecycle::Navigating)?;
        self.recorder.new_document();

        let outcome = match self.detector.navigate_and_wait(target, policy).await {
            Ok(outcome) => outcome,
            Err(e @ ProbeError::NavigationFailed { .. }) => return Err(self.abort(e).await),
            Err(e) => return Err(e),
        };
        self.readiness = Some(outcome.clone());

        match &outcome {
            ReadinessOutcome::Ready { strategy, elapsed } => {
                if self.lifecycle.advance(Lifecycle::Ready).is_err() {
                    return Err(self.crash_failure().await);
                }
                info!(session = %self.id, %strategy, ?elapsed, "page ready");
                Ok(outcome)
            }
            ReadinessOutcome::TimedOut { pending, elapsed, .. } => {
                if self.lifecycle.advance(Lifecycle::TimedOut).is_err() {
                    return Err(self.crash_failure().await);
                }
                let error = ProbeError::NavigationTimeout {
                    target: target.to_string(),
                    pending: pending.clone(),
                    elapsed: *elapsed,
                    report: None,
                };
                Err(self.abort(error).await)
            }
            ReadinessOutcome::Crashed { .. } => Err(self.crash_failure().await),
        }
    }

    /// Navigates to `path` on `server` after its health check.
    ///
    /// # Errors
    ///
    /// Health-check failures, plus everything [`navigate`](Self::navigate) returns.
    pub async fn navigate_to(
        &mut self,
        server: &dyn AppServer,
        path: &str,
        policy: &ReadinessPolicy,
    ) -> Result<ReadinessOutcome> {
        server.health_check().await?;
        let url = server.url(path);
        self.navigate(&url, policy).await
    }

    /// Waits for one more condition on a ready page (a selector after load,
    /// a settling delay). Does not change the lifecycle.
    ///
    /// # Errors
    ///
    /// [`ProbeError::WaitTimeout`] if the condition does not hold in time,
    /// [`ProbeError::CrashDetected`] (with report) if the renderer dies.
    pub async fn wait_for(&mut self, strategy: ReadinessStrategy) -> Result<()> {
        match self.lifecycle.get() {
            Lifecycle::Ready => {}
            Lifecycle::Crashed => return Err(self.crash_failure().await),
            other => {
                return Err(ProbeError::InvalidTransition {
                    from: other.to_string(),
                    to: "waiting".to_string(),
                });
            }
        }

        let limit = strategy.timeout;
        let condition = strategy.strategy.id();
        let policy = ReadinessPolicy::race("post-ready", limit + Duration::from_millis(1))
            .with(strategy.strategy, limit);

        match self.detector.wait(&policy).await? {
            ReadinessOutcome::Ready { .. } => Ok(()),
            ReadinessOutcome::TimedOut { .. } => Err(ProbeError::WaitTimeout { condition, timeout: limit }),
            ReadinessOutcome::Crashed { .. } => Err(self.crash_failure().await),
        }
    }

    /// Passes if `condition` holds; otherwise fails the session like
    /// [`fail`](Self::fail).
    ///
    /// # Errors
    ///
    /// [`ProbeError::AssertionFailure`] with the report path.
    pub async fn ensure(&mut self, condition: bool, message: impl Into<String>) -> Result<()> {
        if condition {
            Ok(())
        } else {
            Err(self.fail(message).await)
        }
    }

    /// Fails the session with a caller-level assertion: reports, closes,
    /// and returns the error to propagate.
    pub async fn fail(&mut self, message: impl Into<String>) -> ProbeError {
        let error = ProbeError::AssertionFailure {
            message: message.into(),
            report: None,
        };
        self.abort(error).await
    }

    /// Captures a report without failing the session.
    ///
    /// Every call writes a new report containing the events recorded up to
    /// that call. The lifecycle is unchanged.
    ///
    /// # Errors
    ///
    /// Only if the report cannot be written.
    pub async fn capture(&self, reason: impl Into<String>) -> Result<PathBuf> {
        self.write_report(ReportReason::requested(reason)).await
    }

    /// Copy of the event log so far.
    #[must_use]
    pub fn events(&self) -> EventLog {
        self.recorder.snapshot()
    }

    /// Per-kind event totals.
    #[must_use]
    pub fn counts(&self) -> EventCounts {
        self.recorder.counts()
    }

    /// Waits until every event the page already emitted is in the log.
    pub async fn flush_events(&self) {
        self.recorder.flush().await;
    }

    /// Evaluates a script in the page.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed or the script fails.
    pub async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        self.ensure_open()?;
        self.driver.evaluate(script).await
    }

    /// Current page URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed or the page is gone.
    pub async fn url(&self) -> Result<String> {
        self.ensure_open()?;
        self.driver.current_url().await
    }

    /// Document title.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed or the page is gone.
    pub async fn title(&self) -> Result<String> {
        self.ensure_open()?;
        self.driver.title().await
    }

    /// Resizes the viewport.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed or the page is gone.
    pub async fn set_viewport(&self, width: u32, height: u32) -> Result<()> {
        self.ensure_open()?;
        self.driver.set_viewport(width, height).await
    }

    /// Ends the session and returns its final, immutable event log.
    pub async fn close(mut self) -> EventLog {
        self.shutdown().await;
        self.recorder.snapshot()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.lifecycle.get().is_terminal() {
            Err(ProbeError::AlreadyClosed)
        } else {
            Ok(())
        }
    }

    async fn crash_failure(&mut self) -> ProbeError {
        self.recorder.flush().await;
        let reason = self
            .recorder
            .crash_reason()
            .unwrap_or_else(|| "renderer process terminated".to_string());
        let error = ProbeError::CrashDetected {
            session: self.id.clone(),
            reason,
            report: None,
        };
        self.abort(error).await
    }

    /// reporting -> capture -> closed, then attaches the report to `error`.
    async fn abort(&mut self, error: ProbeError) -> ProbeError {
        if self.lifecycle.get().is_terminal() {
            return error;
        }
        if let Err(e) = self.lifecycle.advance(Lifecycle::Reporting) {
            debug!(error = %e, "reporting without lifecycle transition");
        }

        self.recorder.flush().await;
        let report = match self.write_report(ReportReason::from_error(&error)).await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(session = %self.id, error = %e, "diagnostic report could not be written");
                None
            }
        };

        self.shutdown().await;
        error.with_report(report)
    }

    async fn write_report(&self, reason: ReportReason) -> Result<PathBuf> {
        let ctx = CaptureContext {
            session_id: &self.id,
            driver: self.driver.as_ref(),
            events: self.recorder.snapshot(),
            lifecycle: self.lifecycle.get(),
            readiness: self.readiness.clone(),
        };
        let path = self.reporter.capture(ctx, reason).await?;
        info!(session = %self.id, report = %path.display(), "diagnostic report captured");
        Ok(path)
    }

    async fn shutdown(&mut self) {
        if self.lifecycle.get().is_terminal() {
            return;
        }
        if let Err(e) = self.lifecycle.advance(Lifecycle::Closed) {
            debug!(error = %e, "closing from unexpected state");
        }
        let log = self.recorder.close().await;
        if let Err(e) = self.driver.close().await {
            warn!(session = %self.id, error = %e, "page did not close cleanly");
        }
        debug!(session = %self.id, events = log.len(), "session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.lifecycle.get().is_terminal() {
            warn!(session = %self.id, "Session dropped without close() - recorder aborted, page left to the browser");
        }
    }
}
