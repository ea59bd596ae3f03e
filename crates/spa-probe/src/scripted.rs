//! A deterministic in-memory page for running the harness without Chrome.
//!
//! [`ScriptedPage`] implements [`PageDriver`] from a script set up by the
//! caller: how long navigation takes to commit, when `document.readyState`
//! advances, when selectors appear, which requests the page makes and what
//! the "network" answers. Control methods inject console output, page errors
//! and crashes at any point.
//!
//! Every simulated request consults the installed [`Interceptor`]. Requests
//! that reach the network are recorded and can be inspected with
//! [`ScriptedPage::network_hits`].
//!
//! All timing uses `tokio::time`, so tests can run on a paused clock.
//!
//! ```ignore
//! let page = Arc::new(
//!     ScriptedPage::new()
//!         .with_title("Admin")
//!         .selector_appears_after("#app", Duration::from_secs(2)),
//! );
//! let session = Session::open(page.clone(), options, Interceptor::new()).await?;
//! ```

use crate::driver::{
    DriverStreams, PageDriver, RawConsole, RawCrash, RawNetwork, RawPageError, SHELL_STATUS_SCRIPT,
};
use crate::error::{ProbeError, Result};
use crate::intercept::{Decision, Interceptor};
use crate::recorder::EventSink;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use tracing::debug;

/// Bytes returned by a scripted screenshot (a PNG signature and a marker).
pub const SCRIPTED_PNG: &[u8] = b"\x89PNG\r\n\x1a\nscripted";

/// What happened to one simulated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Fulfilled by an intercept rule
    Mocked {
        /// Mocked status
        status: u16,
    },
    /// Answered by the scripted network
    Network {
        /// Scripted status
        status: u16,
    },
    /// Failed before a response
    Failed {
        /// Failure cause
        reason: String,
    },
}

#[derive(Debug, Clone)]
struct Script {
    title: String,
    html: String,
    body_text: String,
    navigation_delay: Option<Duration>,
    navigation_error: Option<String>,
    dom_ready_after: Duration,
    load_after: Duration,
    selectors: Vec<(String, Duration)>,
    subresources: Vec<String>,
    polling: Option<(String, Duration)>,
    latency: Duration,
    statuses: HashMap<String, u16>,
    failures: HashMap<String, String>,
    evaluations: HashMap<String, Value>,
    fail_fulfillment: bool,
    fail_screenshot: Option<String>,
    hang_dom_probes: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            title: String::new(),
            html: "<html><head></head><body></body></html>".to_string(),
            body_text: String::new(),
            navigation_delay: Some(Duration::from_millis(50)),
            navigation_error: None,
            dom_ready_after: Duration::from_millis(100),
            load_after: Duration::from_millis(200),
            selectors: Vec::new(),
            subresources: Vec::new(),
            polling: None,
            latency: Duration::from_millis(20),
            statuses: HashMap::new(),
            failures: HashMap::new(),
            evaluations: HashMap::new(),
            fail_fulfillment: false,
            fail_screenshot: None,
            hang_dom_probes: false,
        }
    }
}

struct Feeds {
    console: mpsc::UnboundedSender<RawConsole>,
    page_errors: mpsc::UnboundedSender<RawPageError>,
    crashes: mpsc::UnboundedSender<RawCrash>,
    network: mpsc::UnboundedSender<RawNetwork>,
}

struct Receivers {
    console: mpsc::UnboundedReceiver<RawConsole>,
    page_errors: mpsc::UnboundedReceiver<RawPageError>,
    crashes: mpsc::UnboundedReceiver<RawCrash>,
    network: mpsc::UnboundedReceiver<RawNetwork>,
}

struct PageState {
    script: Mutex<Script>,
    feeds: Mutex<Option<Feeds>>,
    receivers: Mutex<Option<Receivers>>,
    interception: Mutex<Option<Arc<Interceptor>>>,
    committed_at: Mutex<Option<Instant>>,
    url: Mutex<String>,
    viewport: Mutex<Option<(u32, u32)>>,
    network_hits: Mutex<Vec<String>>,
    crash: Mutex<Option<String>>,
    closed: AtomicBool,
    next_request: AtomicU64,
}

/// An in-memory, scriptable [`PageDriver`].
///
/// Cloning yields another handle to the same page.
#[derive(Clone)]
pub struct ScriptedPage {
    state: Arc<PageState>,
}

impl std::fmt::Debug for ScriptedPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedPage")
            .field("url", &*self.state.url.lock())
            .field("closed", &self.state.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Default for ScriptedPage {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedPage {
    /// A page that commits after 50ms, parses at 100ms and loads at 200ms.
    #[must_use]
    pub fn new() -> Self {
        let (console, console_rx) = mpsc::unbounded_channel();
        let (page_errors, page_errors_rx) = mpsc::unbounded_channel();
        let (crashes, crashes_rx) = mpsc::unbounded_channel();
        let (network, network_rx) = mpsc::unbounded_channel();

        Self {
            state: Arc::new(PageState {
                script: Mutex::new(Script::default()),
                feeds: Mutex::new(Some(Feeds {
                    console,
                    page_errors,
                    crashes,
                    network,
                })),
                receivers: Mutex::new(Some(Receivers {
                    console: console_rx,
                    page_errors: page_errors_rx,
                    crashes: crashes_rx,
                    network: network_rx,
                })),
                interception: Mutex::new(None),
                committed_at: Mutex::new(None),
                url: Mutex::new("about:blank".to_string()),
                viewport: Mutex::new(None),
                network_hits: Mutex::new(Vec::new()),
                crash: Mutex::new(None),
                closed: AtomicBool::new(false),
                next_request: AtomicU64::new(1),
            }),
        }
    }

    fn edit(self, f: impl FnOnce(&mut Script)) -> Self {
        f(&mut self.state.script.lock());
        self
    }

    /// Sets the document title.
    #[must_use]
    pub fn with_title(self, title: impl Into<String>) -> Self {
        let title = title.into();
        self.edit(|s| s.title = title)
    }

    /// Sets the serialized HTML.
    #[must_use]
    pub fn with_html(self, html: impl Into<String>) -> Self {
        let html = html.into();
        self.edit(|s| s.html = html)
    }

    /// Sets the rendered body text.
    #[must_use]
    pub fn with_body_text(self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.edit(|s| s.body_text = text)
    }

    /// Time from `navigate` to commit.
    #[must_use]
    pub fn navigation_delay(self, delay: Duration) -> Self {
        self.edit(|s| s.navigation_delay = Some(delay))
    }

    /// Navigation never commits.
    #[must_use]
    pub fn hang_navigation(self) -> Self {
        self.edit(|s| s.navigation_delay = None)
    }

    /// Navigation is rejected with `reason` (e.g. `net::ERR_CONNECTION_REFUSED`).
    #[must_use]
    pub fn navigation_error(self, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        self.edit(|s| s.navigation_error = Some(reason))
    }

    /// When `readyState` becomes `interactive` and `complete`, relative to commit.
    #[must_use]
    pub fn ready_state_timing(self, interactive: Duration, complete: Duration) -> Self {
        self.edit(|s| {
            s.dom_ready_after = interactive;
            s.load_after = complete.max(interactive);
        })
    }

    /// `selector` starts matching `after` the commit.
    #[must_use]
    pub fn selector_appears_after(self, selector: impl Into<String>, after: Duration) -> Self {
        let selector = selector.into();
        self.edit(|s| s.selectors.push((selector, after)))
    }

    /// The page requests `url` right after commit.
    #[must_use]
    pub fn with_subresource(self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.edit(|s| s.subresources.push(url))
    }

    /// After commit the page requests `url` every `interval` until closed.
    #[must_use]
    pub fn background_polling(self, url: impl Into<String>, interval: Duration) -> Self {
        let url = url.into();
        self.edit(|s| s.polling = Some((url, interval)))
    }

    /// Time a network request spends in flight.
    #[must_use]
    pub fn network_latency(self, latency: Duration) -> Self {
        self.edit(|s| s.latency = latency)
    }

    /// The network answers `url` with `status` instead of 200.
    #[must_use]
    pub fn respond_with(self, url: impl Into<String>, status: u16) -> Self {
        let url = url.into();
        self.edit(|s| {
            s.statuses.insert(url, status);
        })
    }

    /// The network fails `url` with `error_text`.
    #[must_use]
    pub fn fail_request(self, url: impl Into<String>, error_text: impl Into<String>) -> Self {
        let (url, error_text) = (url.into(), error_text.into());
        self.edit(|s| {
            s.failures.insert(url, error_text);
        })
    }

    /// `evaluate(script)` returns `value`.
    #[must_use]
    pub fn with_evaluation(self, script: impl Into<String>, value: Value) -> Self {
        let script = script.into();
        self.edit(|s| {
            s.evaluations.insert(script, value);
        })
    }

    /// Intercepted requests fail to be fulfilled.
    #[must_use]
    pub fn failing_fulfillment(self) -> Self {
        self.edit(|s| s.fail_fulfillment = true)
    }

    /// `readyState` and selector checks never answer, like a renderer stuck
    /// in a long task.
    #[must_use]
    pub fn hang_dom_probes(self) -> Self {
        self.edit(|s| s.hang_dom_probes = true)
    }

    /// Screenshots fail with `reason`.
    #[must_use]
    pub fn failing_screenshot(self, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        self.edit(|s| s.fail_screenshot = Some(reason))
    }

    /// Emits a console call with one string argument.
    pub fn emit_console(&self, level: &str, text: impl Into<String>) {
        self.emit_console_args(level, vec![Value::String(text.into())]);
    }

    /// Emits a console call with arbitrary arguments.
    pub fn emit_console_args(&self, level: &str, args: Vec<Value>) {
        if let Some(feeds) = self.state.feeds.lock().as_ref() {
            let _ = feeds.console.send(RawConsole {
                level: level.to_string(),
                args,
                source: None,
            });
        }
    }

    /// Emits an uncaught page error.
    pub fn emit_page_error(&self, message: impl Into<String>) {
        if let Some(feeds) = self.state.feeds.lock().as_ref() {
            let _ = feeds.page_errors.send(RawPageError {
                message: Some(message.into()),
                description: None,
                stack: None,
            });
        }
    }

    /// Kills the renderer. Every later page call fails with
    /// [`ProbeError::ProcessTerminated`] and pending navigation never commits.
    pub fn crash(&self, reason: impl Into<String>) {
        let reason = reason.into();
        *self.state.crash.lock() = Some(reason.clone());
        if let Some(feeds) = self.state.feeds.lock().as_ref() {
            let _ = feeds.crashes.send(RawCrash { reason: Some(reason) });
        }
    }

    /// Simulates the page fetching `url`.
    pub async fn request(&self, url: impl Into<String>) -> RequestOutcome {
        self.state.request(url.into()).await
    }

    /// URLs that reached the scripted network, in request order.
    #[must_use]
    pub fn network_hits(&self) -> Vec<String> {
        self.state.network_hits.lock().clone()
    }

    /// Viewport set by the last `set_viewport` call.
    #[must_use]
    pub fn viewport(&self) -> Option<(u32, u32)> {
        *self.state.viewport.lock()
    }

    /// True once `close` was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    fn since_commit(&self) -> Option<Duration> {
        self.state.committed_at.lock().map(|at| at.elapsed())
    }

    fn alive(&self) -> Result<()> {
        self.state.alive()
    }
}

impl PageState {
    fn alive(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProbeError::AlreadyClosed);
        }
        if self.crash.lock().is_some() {
            return Err(ProbeError::ProcessTerminated);
        }
        Ok(())
    }

    fn emit_network(&self, event: RawNetwork) {
        if let Some(feeds) = self.feeds.lock().as_ref() {
            let _ = feeds.network.send(event);
        }
    }

    async fn request(&self, url: String) -> RequestOutcome {
        if let Err(e) = self.alive() {
            return RequestOutcome::Failed { reason: e.to_string() };
        }
        let id = self.next_request.fetch_add(1, Ordering::SeqCst).to_string();
        self.emit_network(RawNetwork::Started {
            id: id.clone(),
            url: url.clone(),
        });

        let interceptor = self.interception.lock().clone();
        let decision = interceptor.map_or(Decision::PassThrough, |interceptor| interceptor.decide(&url));
        let script = self.script.lock().clone();

        match decision {
            Decision::Fulfill(mock) => {
                if script.fail_fulfillment {
                    // the network failure is the one record of it
                    self.emit_network(RawNetwork::Failed {
                        id,
                        error_text: Some("mock fulfillment failed: scripted failure".to_string()),
                        canceled: false,
                    });
                    return RequestOutcome::Failed {
                        reason: "mock fulfillment failed".to_string(),
                    };
                }
                self.emit_network(RawNetwork::Responded {
                    id: id.clone(),
                    url,
                    status: i64::from(mock.status),
                });
                self.emit_network(RawNetwork::Finished { id });
                RequestOutcome::Mocked { status: mock.status }
            }
            Decision::PassThrough => {
                self.network_hits.lock().push(url.clone());
                sleep(script.latency).await;

                if let Some(error_text) = script.failures.get(&url) {
                    self.emit_network(RawNetwork::Failed {
                        id,
                        error_text: Some(error_text.clone()),
                        canceled: false,
                    });
                    return RequestOutcome::Failed {
                        reason: error_text.clone(),
                    };
                }

                let status = script.statuses.get(&url).copied().unwrap_or(200);
                self.emit_network(RawNetwork::Responded {
                    id: id.clone(),
                    url,
                    status: i64::from(status),
                });
                self.emit_network(RawNetwork::Finished { id });
                RequestOutcome::Network { status }
            }
        }
    }
}

fn channel_stream<T: Send + 'static>(rx: mpsc::UnboundedReceiver<T>) -> BoxStream<'static, T> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}

#[async_trait]
impl PageDriver for ScriptedPage {
    async fn subscribe(&self) -> Result<DriverStreams> {
        let receivers = self
            .state
            .receivers
            .lock()
            .take()
            .ok_or_else(|| ProbeError::ConnectionFailed("page already has a subscriber".to_string()))?;

        Ok(DriverStreams {
            console: channel_stream(receivers.console),
            page_errors: channel_stream(receivers.page_errors),
            crashes: channel_stream(receivers.crashes),
            network: channel_stream(receivers.network),
        })
    }

    async fn enable_interception(&self, interceptor: Arc<Interceptor>, _sink: EventSink) -> Result<()> {
        self.alive()?;
        *self.state.interception.lock() = Some(interceptor);
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.alive()?;
        let script = self.state.script.lock().clone();

        match script.navigation_delay {
            Some(delay) => sleep(delay).await,
            None => std::future::pending::<()>().await,
        }
        self.alive()?;

        if let Some(reason) = script.navigation_error {
            return Err(ProbeError::NavigationFailed {
                url: url.to_string(),
                reason,
                report: None,
            });
        }

        *self.state.url.lock() = url.to_string();
        *self.state.committed_at.lock() = Some(Instant::now());
        debug!(url, "scripted navigation committed");

        let page = self.clone();
        let document = url.to_string();
        tokio::spawn(async move {
            page.state.request(document).await;
        });
        for resource in script.subresources {
            let page = self.clone();
            tokio::spawn(async move {
                page.state.request(resource).await;
            });
        }
        if let Some((poll_url, interval)) = script.polling {
            let page = self.clone();
            tokio::spawn(async move {
                loop {
                    sleep(interval).await;
                    if page.alive().is_err() {
                        break;
                    }
                    page.state.request(poll_url.clone()).await;
                }
            });
        }
        Ok(())
    }

    async fn ready_state(&self) -> Result<String> {
        self.alive()?;
        let script = self.state.script.lock().clone();
        if script.hang_dom_probes {
            std::future::pending::<()>().await;
        }
        let state = match self.since_commit() {
            None => "loading",
            Some(t) if t < script.dom_ready_after => "loading",
            Some(t) if t < script.load_after => "interactive",
            Some(_) => "complete",
        };
        Ok(state.to_string())
    }

    async fn selector_present(&self, selector: &str) -> Result<bool> {
        self.alive()?;
        let hang = self.state.script.lock().hang_dom_probes;
        if hang {
            std::future::pending::<()>().await;
        }
        let Some(since) = self.since_commit() else {
            return Ok(false);
        };
        Ok(self
            .state
            .script
            .lock()
            .selectors
            .iter()
            .any(|(s, after)| s == selector && since >= *after))
    }

    async fn current_url(&self) -> Result<String> {
        self.alive()?;
        Ok(self.state.url.lock().clone())
    }

    async fn title(&self) -> Result<String> {
        self.alive()?;
        Ok(self.state.script.lock().title.clone())
    }

    async fn content(&self) -> Result<String> {
        self.alive()?;
        Ok(self.state.script.lock().html.clone())
    }

    async fn body_text(&self) -> Result<String> {
        self.alive()?;
        Ok(self.state.script.lock().body_text.clone())
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        self.alive()?;
        if let Some(value) = self.state.script.lock().evaluations.get(script) {
            return Ok(value.clone());
        }
        if script == SHELL_STATUS_SCRIPT {
            let mounted = self.selector_present("#app").await?;
            return Ok(json!({
                "appExists": mounted,
                "appChildren": u32::from(mounted),
                "appInnerHtml": "",
                "scriptCount": 1,
                "stylesheetCount": 0,
                "bodyClass": ""
            }));
        }
        Ok(Value::Null)
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.alive()?;
        if let Some(reason) = self.state.script.lock().fail_screenshot.clone() {
            return Err(ProbeError::ScriptExecutionFailed(reason));
        }
        Ok(SCRIPTED_PNG.to_vec())
    }

    async fn set_viewport(&self, width: u32, height: u32) -> Result<()> {
        self.alive()?;
        *self.state.viewport.lock() = Some((width, height));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.closed.store(true, Ordering::SeqCst);
        // ends the event streams
        self.state.feeds.lock().take();
        Ok(())
    }
}
