//! Diagnostic reports written when a session fails or on request.
//!
//! Every capture gets its own directory:
//!
//! ```text
//! <reports_dir>/<test-slug>/<yyyymmddTHHMMSS.mmmZ>-<nnn>/
//!     report.json      structured summary (this module's DiagnosticReport)
//!     events.jsonl     the event log, one event per line
//!     screenshot.png   if the page could still render one
//!     snapshot.html    serialized DOM
//!     snapshot.txt     rendered body text
//! ```
//!
//! Capturing never fails because the page is in a bad state: each artifact
//! is gathered under its own timeout, and whatever could not be collected is
//! listed in `missing` instead. Only an unwritable report directory is an
//! error.

use crate::driver::{PageDriver, SHELL_STATUS_SCRIPT};
use crate::error::{FailureKind, ProbeError, Result};
use crate::readiness::ReadinessOutcome;
use crate::recorder::{EventCounts, EventLog};
use crate::server::{BackendProbe, EndpointStatus};
use crate::session::Lifecycle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// File name of the structured report inside a report directory.
pub const REPORT_FILE: &str = "report.json";

const EVENTS_FILE: &str = "events.jsonl";
const SCREENSHOT_FILE: &str = "screenshot.png";
const HTML_FILE: &str = "snapshot.html";
const TEXT_FILE: &str = "snapshot.txt";

/// Characters of HTML kept inline in the report.
const HTML_PREVIEW_CHARS: usize = 2000;

/// Attempts at finding a free directory name before giving up.
const MAX_DIR_ATTEMPTS: u32 = 1000;

/// Why a report was captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportReason {
    /// Failure classification
    pub kind: FailureKind,
    /// Human-readable message
    pub message: String,
}

impl ReportReason {
    /// A reason for an explicitly requested capture.
    #[must_use]
    pub fn requested(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Requested,
            message: message.into(),
        }
    }

    /// The reason describing `error`.
    #[must_use]
    pub fn from_error(error: &ProbeError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// An artifact that could not be collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingArtifact {
    /// Artifact name (`screenshot`, `snapshot.url`, ...)
    pub artifact: String,
    /// Why it is missing
    pub reason: String,
}

/// DOM and text state of the page at capture time.
///
/// Each field is best effort; a field that could not be read is `None`
/// and has a matching [`MissingArtifact`] entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshot {
    /// Page URL
    pub url: Option<String>,
    /// Document title
    pub title: Option<String>,
    /// Length of the serialized HTML
    pub html_length: Option<usize>,
    /// Leading part of the serialized HTML
    pub html_preview: Option<String>,
    /// Rendered body text
    pub body_text: Option<String>,
    /// Application shell status (`#app` presence, children, assets)
    pub shell: Option<serde_json::Value>,
}

impl PageSnapshot {
    fn is_empty(&self) -> bool {
        self.url.is_none()
            && self.title.is_none()
            && self.html_length.is_none()
            && self.body_text.is_none()
            && self.shell.is_none()
    }
}

/// The immutable bundle produced by one capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticReport {
    /// Session the report belongs to
    pub session_id: String,
    /// Test that owned the session
    pub test_name: String,
    /// Capture time
    pub created_at: DateTime<Utc>,
    /// Triggering failure or request
    pub reason: ReportReason,
    /// Lifecycle state when capture started
    pub lifecycle: Lifecycle,
    /// Readiness result, if a navigation ran
    pub readiness: Option<ReadinessOutcome>,
    /// Per-kind totals of `events`
    pub counts: EventCounts,
    /// The event log up to the capture call
    pub events: EventLog,
    /// Screenshot file, absent when the page could not render one
    pub screenshot: Option<PathBuf>,
    /// DOM/text snapshot, absent when nothing could be read
    pub snapshot: Option<PageSnapshot>,
    /// Direct back-end probe results, when a back end is configured
    pub backend: Option<Vec<EndpointStatus>>,
    /// Artifacts that could not be collected
    pub missing: Vec<MissingArtifact>,
}

impl DiagnosticReport {
    /// Reads a report back from its directory or its `report.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = if path.is_dir() { path.join(REPORT_FILE) } else { path.to_path_buf() };
        let json = std::fs::read_to_string(file)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// True if `artifact` was recorded as missing.
    #[must_use]
    pub fn is_missing(&self, artifact: &str) -> bool {
        self.missing.iter().any(|m| m.artifact == artifact)
    }

    /// Multi-line human summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("{} ({}): {}", self.test_name, self.reason.kind, self.reason.message),
            format!(
                "events: {} total, {} console, {} page errors, {} crashes, {} failed requests",
                self.counts.total(),
                self.counts.console,
                self.counts.page_error,
                self.counts.crash,
                self.counts.request_failed
            ),
        ];
        if let Some(readiness) = &self.readiness {
            lines.push(format!("readiness: {readiness}"));
        }
        if let Some(shell) = self.snapshot.as_ref().and_then(|s| s.shell.as_ref()) {
            lines.push(format!("shell: {shell}"));
        }
        for endpoint in self.backend.iter().flatten() {
            lines.push(format!("backend: {endpoint}"));
        }
        for missing in &self.missing {
            lines.push(format!("missing {}: {}", missing.artifact, missing.reason));
        }
        lines.join("\n")
    }
}

/// Reporter settings.
#[derive(Debug, Clone)]
pub struct ReporterOptions {
    /// Root directory for all reports
    pub reports_dir: PathBuf,
    /// Test name, turned into the second path component
    pub test_name: String,
    /// Budget for each artifact
    pub artifact_timeout: Duration,
    /// Back end to probe into each report
    pub backend: Option<BackendProbe>,
}

/// Session state handed to a capture.
#[derive(Debug)]
pub struct CaptureContext<'a> {
    /// Session id
    pub session_id: &'a str,
    /// Page to collect artifacts from
    pub driver: &'a dyn PageDriver,
    /// Event log at call time
    pub events: EventLog,
    /// Lifecycle state at call time
    pub lifecycle: Lifecycle,
    /// Last readiness outcome
    pub readiness: Option<ReadinessOutcome>,
}

/// Writes diagnostic reports for one session.
#[derive(Debug)]
pub struct DiagnosticReporter {
    options: ReporterOptions,
    counter: AtomicU32,
}

impl DiagnosticReporter {
    /// Creates a reporter.
    #[must_use]
    pub fn new(options: ReporterOptions) -> Self {
        Self {
            options,
            counter: AtomicU32::new(0),
        }
    }

    /// Directory that holds all reports of this test.
    #[must_use]
    pub fn test_dir(&self) -> PathBuf {
        self.options.reports_dir.join(slugify(&self.options.test_name))
    }

    /// Gathers every artifact and writes a new report.
    ///
    /// Returns the path of the written `report.json`. Each call produces a
    /// separate directory.
    ///
    /// # Errors
    ///
    /// Only when the report directory or `report.json` cannot be written.
    pub async fn capture(&self, ctx: CaptureContext<'_>, reason: ReportReason) -> Result<PathBuf> {
        let created_at = Utc::now();
        let dir = self.create_dir(created_at).await?;
        let mut missing = Vec::new();
        let budget = self.options.artifact_timeout;

        match ctx.events.to_jsonl() {
            Ok(lines) => {
                if let Err(e) = tokio::fs::write(dir.join(EVENTS_FILE), lines).await {
                    missing.push(missing_artifact("events", e));
                }
            }
            Err(e) => missing.push(missing_artifact("events", e)),
        }

        let screenshot = match gather(budget, ctx.driver.screenshot()).await {
            Ok(png) => {
                let path = dir.join(SCREENSHOT_FILE);
                match tokio::fs::write(&path, png).await {
                    Ok(()) => Some(path),
                    Err(e) => {
                        missing.push(missing_artifact("screenshot", e));
                        None
                    }
                }
            }
            Err(reason) => {
                missing.push(MissingArtifact {
                    artifact: "screenshot".to_string(),
                    reason,
                });
                None
            }
        };

        let snapshot = self.snapshot(ctx.driver, &dir, &mut missing).await;

        let backend = match &self.options.backend {
            Some(probe) => Some(probe.run().await),
            None => None,
        };

        let report = DiagnosticReport {
            session_id: ctx.session_id.to_string(),
            test_name: self.options.test_name.clone(),
            created_at,
            reason,
            lifecycle: ctx.lifecycle,
            readiness: ctx.readiness,
            counts: ctx.events.counts(),
            events: ctx.events,
            screenshot,
            snapshot,
            backend,
            missing,
        };

        for m in &report.missing {
            warn!(artifact = %m.artifact, reason = %m.reason, "artifact missing from report");
        }

        let path = dir.join(REPORT_FILE);
        tokio::fs::write(&path, serde_json::to_vec_pretty(&report)?).await?;
        debug!(path = %path.display(), "diagnostic report written");
        Ok(path)
    }

    async fn snapshot(&self, driver: &dyn PageDriver, dir: &Path, missing: &mut Vec<MissingArtifact>) -> Option<PageSnapshot> {
        let budget = self.options.artifact_timeout;
        let mut snapshot = PageSnapshot::default();

        let mut note = |artifact: &str, reason: String| {
            missing.push(MissingArtifact {
                artifact: artifact.to_string(),
                reason,
            });
        };

        match gather(budget, driver.current_url()).await {
            Ok(url) => snapshot.url = Some(url),
            Err(reason) => note("snapshot.url", reason),
        }
        match gather(budget, driver.title()).await {
            Ok(title) => snapshot.title = Some(title),
            Err(reason) => note("snapshot.title", reason),
        }
        match gather(budget, driver.content()).await {
            Ok(html) => {
                snapshot.html_length = Some(html.len());
                snapshot.html_preview = Some(html.chars().take(HTML_PREVIEW_CHARS).collect());
                if let Err(e) = tokio::fs::write(dir.join(HTML_FILE), html).await {
                    note("snapshot.html", e.to_string());
                }
            }
            Err(reason) => note("snapshot.html", reason),
        }
        match gather(budget, driver.body_text()).await {
            Ok(text) => {
                if let Err(e) = tokio::fs::write(dir.join(TEXT_FILE), &text).await {
                    note("snapshot.text", e.to_string());
                }
                snapshot.body_text = Some(text);
            }
            Err(reason) => note("snapshot.text", reason),
        }
        match gather(budget, driver.evaluate(SHELL_STATUS_SCRIPT)).await {
            Ok(shell) => snapshot.shell = Some(shell),
            Err(reason) => note("snapshot.shell", reason),
        }

        if snapshot.is_empty() {
            note("snapshot", "page state could not be read".to_string());
            None
        } else {
            Some(snapshot)
        }
    }

    async fn create_dir(&self, created_at: DateTime<Utc>) -> Result<PathBuf> {
        let parent = self.test_dir();
        tokio::fs::create_dir_all(&parent).await?;
        let stamp = created_at.format("%Y%m%dT%H%M%S%.3fZ");

        for _ in 0..MAX_DIR_ATTEMPTS {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            let dir = parent.join(format!("{stamp}-{n:03}"));
            match tokio::fs::create_dir(&dir).await {
                Ok(()) => return Ok(dir),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }
        }

        Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("no free report directory under {}", parent.display()),
        )
        .into())
    }
}

async fn gather<T>(budget: Duration, artifact: impl Future<Output = Result<T>>) -> std::result::Result<T, String> {
    match timeout(budget, artifact).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("timed out after {budget:?}")),
    }
}

fn missing_artifact(artifact: &str, error: impl std::fmt::Display) -> MissingArtifact {
    MissingArtifact {
        artifact: artifact.to_string(),
        reason: error.to_string(),
    }
}

/// Turns a test name into a single safe path component.
#[must_use]
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug: String = slug.trim_matches('-').chars().take(80).collect();
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() { "session".to_string() } else { slug }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_are_single_path_components() {
        assert_eq!(slugify("Dashboard loads after login"), "dashboard-loads-after-login");
        assert_eq!(slugify("../../etc/passwd"), "etc-passwd");
        assert_eq!(slugify("theme: dark / light"), "theme-dark-light");
        assert_eq!(slugify("***"), "session");
        assert!(slugify(&"x".repeat(200)).len() <= 80);
    }

    #[test]
    fn summary_lists_missing_artifacts() {
        let report = DiagnosticReport {
            session_id: "s".into(),
            test_name: "login".into(),
            created_at: Utc::now(),
            reason: ReportReason::requested("manual"),
            lifecycle: Lifecycle::Ready,
            readiness: None,
            counts: EventCounts::default(),
            events: EventLog::default(),
            screenshot: None,
            snapshot: None,
            backend: None,
            missing: vec![MissingArtifact {
                artifact: "screenshot".into(),
                reason: "page process terminated".into(),
            }],
        };
        let summary = report.summary();
        assert!(summary.contains("login (Requested): manual"));
        assert!(summary.contains("missing screenshot: page process terminated"));
        assert!(report.is_missing("screenshot"));
    }
}
