//! Error types for harness operations.
//!
//! The taxonomy separates failures that end a session (navigation timeouts,
//! renderer crashes, caller assertions) from setup mistakes (malformed
//! intercept rules, invalid readiness policies) and plumbing errors coming
//! from the browser connection. Fatal session failures carry the path of the
//! diagnostic report written for them so the failure and its context travel
//! together.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// The main error type for all harness operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// No readiness strategy was satisfied before the policy deadline.
    #[error("navigation to '{target}' timed out after {elapsed:?} (pending: {}){}", .pending.join(", "), ReportSuffix(.report.as_deref()))]
    NavigationTimeout {
        /// The navigation target
        target: String,
        /// Strategies that had not resolved when the deadline passed
        pending: Vec<String>,
        /// Time spent before giving up
        elapsed: Duration,
        /// Diagnostic report written for this failure
        report: Option<PathBuf>,
    },

    /// An intercept rule is malformed or conflicts with an existing rule.
    #[error("intercept rule '{pattern}' rejected: {reason}")]
    InterceptMismatch {
        /// The pattern as registered
        pattern: String,
        /// Why the rule was rejected
        reason: String,
    },

    /// The renderer terminated unexpectedly. Always fatal to the session.
    #[error("renderer crashed in session {session}: {reason}{}", ReportSuffix(.report.as_deref()))]
    CrashDetected {
        /// Session that crashed
        session: String,
        /// Crash description from the browser
        reason: String,
        /// Diagnostic report written for this failure
        report: Option<PathBuf>,
    },

    /// A caller-level assertion failed inside a session.
    #[error("assertion failed: {message}{}", ReportSuffix(.report.as_deref()))]
    AssertionFailure {
        /// Assertion message supplied by the caller
        message: String,
        /// Diagnostic report written for this failure
        report: Option<PathBuf>,
    },

    /// The browser refused or aborted the navigation itself.
    #[error("navigation to '{url}' failed: {reason}{}", ReportSuffix(.report.as_deref()))]
    NavigationFailed {
        /// The URL that failed to load
        url: String,
        /// Reason reported by the browser
        reason: String,
        /// Diagnostic report written for this failure
        report: Option<PathBuf>,
    },

    /// A readiness policy cannot be executed as configured.
    #[error("invalid readiness policy '{policy}': {reason}")]
    InvalidPolicy {
        /// Policy name
        policy: String,
        /// What is wrong with it
        reason: String,
    },

    /// A session lifecycle transition that the state machine forbids.
    #[error("illegal lifecycle transition {from} -> {to}")]
    InvalidTransition {
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// A wait condition was not satisfied within its timeout.
    #[error("wait condition '{condition}' timed out after {timeout:?}")]
    WaitTimeout {
        /// Description of the condition that timed out
        condition: String,
        /// How long we waited before timing out
        timeout: Duration,
    },

    /// Failed to launch the browser process.
    #[error("failed to launch browser: {reason}")]
    LaunchFailed {
        /// Human-readable reason for the launch failure
        reason: String,
        /// Optional underlying error that caused the failure
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Failed to talk to the page over the DevTools connection.
    #[error("CDP connection failed: {0}")]
    ConnectionFailed(String),

    /// JavaScript execution in the page context failed.
    #[error("JavaScript execution failed: {0}")]
    ScriptExecutionFailed(String),

    /// The page process is gone; artifacts can no longer be collected.
    #[error("page process terminated")]
    ProcessTerminated,

    /// An operation was attempted on a closed browser or session.
    #[error("browser instance is already closed")]
    AlreadyClosed,

    /// Wraps errors from the chromiumoxide library.
    #[error("chromiumoxide error: {0}")]
    ChromiumOxide(#[from] chromiumoxide::error::CdpError),

    /// Direct HTTP requests to the back end failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic I/O errors (report writing, temp dirs).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Report serialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification used in report summaries and CLI output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// See [`ProbeError::NavigationTimeout`]
    NavigationTimeout,
    /// See [`ProbeError::InterceptMismatch`]
    InterceptMismatch,
    /// See [`ProbeError::CrashDetected`]
    CrashDetected,
    /// See [`ProbeError::AssertionFailure`]
    AssertionFailure,
    /// See [`ProbeError::NavigationFailed`]
    NavigationFailed,
    /// Explicitly requested capture, no failure involved
    Requested,
    /// Anything else
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::NavigationTimeout => "NavigationTimeout",
            FailureKind::InterceptMismatch => "InterceptMismatch",
            FailureKind::CrashDetected => "CrashDetected",
            FailureKind::AssertionFailure => "AssertionFailure",
            FailureKind::NavigationFailed => "NavigationFailed",
            FailureKind::Requested => "Requested",
            FailureKind::Internal => "Internal",
        };
        f.write_str(name)
    }
}

impl ProbeError {
    /// Returns the failure classification of this error.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            ProbeError::NavigationTimeout { .. } => FailureKind::NavigationTimeout,
            ProbeError::InterceptMismatch { .. } => FailureKind::InterceptMismatch,
            ProbeError::CrashDetected { .. } => FailureKind::CrashDetected,
            ProbeError::AssertionFailure { .. } => FailureKind::AssertionFailure,
            ProbeError::NavigationFailed { .. } => FailureKind::NavigationFailed,
            _ => FailureKind::Internal,
        }
    }

    /// Returns the diagnostic report attached to this failure, if any.
    #[must_use]
    pub fn report_path(&self) -> Option<&Path> {
        match self {
            ProbeError::NavigationTimeout { report, .. }
            | ProbeError::CrashDetected { report, .. }
            | ProbeError::AssertionFailure { report, .. }
            | ProbeError::NavigationFailed { report, .. } => report.as_deref(),
            _ => None,
        }
    }

    /// Attaches a report path to a session-fatal error.
    ///
    /// Errors that never trigger reporting are returned unchanged.
    #[must_use]
    pub fn with_report(mut self, path: Option<PathBuf>) -> Self {
        match &mut self {
            ProbeError::NavigationTimeout { report, .. }
            | ProbeError::CrashDetected { report, .. }
            | ProbeError::AssertionFailure { report, .. }
            | ProbeError::NavigationFailed { report, .. } => *report = path,
            _ => {}
        }
        self
    }
}

struct ReportSuffix<'a>(Option<&'a Path>);

impl fmt::Display for ReportSuffix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(path) => write!(f, " [report: {}]", path.display()),
            None => Ok(()),
        }
    }
}

/// A specialized Result type for harness operations.
pub type Result<T> = std::result::Result<T, ProbeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_path_is_attached_to_fatal_errors_only() {
        let err = ProbeError::CrashDetected {
            session: "s1".into(),
            reason: "gone".into(),
            report: None,
        }
        .with_report(Some(PathBuf::from("/tmp/r/report.json")));
        assert_eq!(err.report_path(), Some(Path::new("/tmp/r/report.json")));
        assert!(err.to_string().contains("[report: /tmp/r/report.json]"));

        let err = ProbeError::AlreadyClosed.with_report(Some(PathBuf::from("/x")));
        assert!(err.report_path().is_none());
    }

    #[test]
    fn timeout_message_lists_pending_strategies() {
        let err = ProbeError::NavigationTimeout {
            target: "http://localhost/".into(),
            pending: vec!["network-quiescent".into(), "selector-present(#app)".into()],
            elapsed: Duration::from_secs(10),
            report: None,
        };
        let msg = err.to_string();
        assert!(msg.contains("network-quiescent, selector-present(#app)"));
        assert_eq!(err.kind(), FailureKind::NavigationTimeout);
    }
}
