//! # spa-probe
//!
//! Diagnostic harness for end-to-end tests of single-page applications,
//! built on chromiumoxide.
//!
//! A test opens a [`Session`] on a fresh tab, navigates with a named
//! [`ReadinessPolicy`], asserts, and closes. Along the way the harness
//! answers known-noisy subresource requests locally, records everything the
//! page says (console, uncaught errors, crashes, network outcomes), and when
//! something fails writes a self-contained report directory explaining why.
//!
//! ## Architecture
//!
//! - **Interceptor**: ordered URL rules answered with canned responses
//! - **EventRecorder**: one writer task appending page events to an ordered log
//! - **ReadinessDetector**: races or chains readiness strategies under a deadline
//! - **DiagnosticReporter**: screenshot, DOM snapshot, events and summary on failure
//! - **Session**: owns one tab and drives the lifecycle
//!   `created -> intercepting -> navigating -> ready -> reporting -> closed`
//! - **PageDriver**: the seam between the harness and a browser tab;
//!   [`ChromePage`] talks CDP, [`ScriptedPage`] is a deterministic stand-in
//!
//! ## Example Usage
//!
//! ```ignore
//! use spa_probe::{Interceptor, ReadinessPolicy, SessionOptions, TestBrowser, TestBrowserConfig};
//!
//! #[tokio::test]
//! async fn login_page_renders() -> spa_probe::Result<()> {
//!     let browser = TestBrowser::launch(TestBrowserConfig::default()).await?;
//!     let mut session = browser
//!         .open_session(SessionOptions::new("login page renders"), Interceptor::external_assets()?)
//!         .await?;
//!
//!     session
//!         .navigate("http://localhost:8080/admin-next/login", &ReadinessPolicy::shell_mounted("#app"))
//!         .await?;
//!
//!     let errors = session.counts().get(spa_probe::EventKind::PageError);
//!     session.ensure(errors == 0, "page raised uncaught errors").await?;
//!
//!     session.close().await;
//!     browser.close().await
//! }
//! ```
//!
//! ## Testing Strategy
//!
//! 1. **Unit and harness tests** run against [`ScriptedPage`] with paused tokio time
//! 2. **Integration tests** drive a real Chrome and are `#[ignore]`d
//!
//! Run with `cargo test` (unit) or `cargo test -- --ignored` (integration).

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod browser;
pub mod driver;
pub mod error;
pub mod intercept;
pub mod page;
pub mod readiness;
pub mod recorder;
pub mod report;
pub mod scripted;
pub mod server;
pub mod session;
pub mod wait;

// Re-export main types for convenience
pub use browser::{TestBrowser, TestBrowserConfig};
pub use driver::PageDriver;
pub use error::{FailureKind, ProbeError, Result};
pub use intercept::{Decision, Interceptor, MockResponse, UrlPattern};
pub use page::ChromePage;
pub use readiness::{Composition, ReadinessOutcome, ReadinessPolicy, ReadinessStrategy, Strategy};
pub use recorder::{CapturedEvent, ConsoleLevel, EventCounts, EventKind, EventLog, EventPayload, EventRecorder};
pub use report::{DiagnosticReport, DiagnosticReporter};
pub use scripted::ScriptedPage;
pub use server::{AppServer, BackendProbe, EndpointStatus, StaticUrlServer};
pub use session::{Lifecycle, Session, SessionOptions};
pub use spa_probe_config::{HarnessConfig, Viewport};
pub use wait::{DEFAULT_POLL_INTERVAL, WaitConfig};
