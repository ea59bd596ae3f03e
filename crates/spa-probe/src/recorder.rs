//! Ordered capture of a session's asynchronous events.
//!
//! A page produces events on four independent sources: console output,
//! uncaught page errors, renderer crashes and network activity. The recorder
//! runs one writer task per session that consumes all four streams (plus a
//! command channel) and appends normalized [`CapturedEvent`]s under a single
//! sequence counter, so a session's log is totally ordered no matter how the
//! sources interleave.
//!
//! # Design
//!
//! Only the writer task mutates the log. Readers take short read locks to
//! copy it out (`snapshot`) or read the running totals (`counts`), so test
//! code never blocks event delivery for longer than one clone. Malformed
//! payloads are coerced to strings rather than dropped.

use crate::driver::{DriverStreams, PageDriver, RawConsole, RawCrash, RawNetwork, RawPageError};
use crate::error::Result;
use crate::session::LifecycleCell;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, Fuse};
use futures::{FutureExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// The severity level of a console message.
///
/// Maps directly to JavaScript console methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    /// `console.log()`
    Log,
    /// `console.info()`
    Info,
    /// `console.warn()`
    Warning,
    /// `console.error()`
    Error,
    /// `console.debug()`
    Debug,
    /// Catch-all for other console APIs
    Other,
}

impl ConsoleLevel {
    /// Returns true if this is an error-level message.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, ConsoleLevel::Error)
    }

    /// Returns true if this is a warning or error.
    #[must_use]
    pub fn is_warning_or_error(&self) -> bool {
        matches!(self, ConsoleLevel::Warning | ConsoleLevel::Error)
    }
}

impl From<&str> for ConsoleLevel {
    fn from(s: &str) -> Self {
        match s {
            "log" => ConsoleLevel::Log,
            "info" => ConsoleLevel::Info,
            "warning" | "warn" => ConsoleLevel::Warning,
            "error" | "assert" => ConsoleLevel::Error,
            "debug" => ConsoleLevel::Debug,
            _ => ConsoleLevel::Other,
        }
    }
}

/// Event classification used for counting and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    /// Console output
    Console,
    /// Uncaught script error
    PageError,
    /// Renderer crash
    Crash,
    /// Request that failed or was aborted
    RequestFailed,
    /// Request that received a response
    RequestSucceeded,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Console => "console",
            EventKind::PageError => "pageError",
            EventKind::Crash => "crash",
            EventKind::RequestFailed => "requestFailed",
            EventKind::RequestSucceeded => "requestSucceeded",
        };
        f.write_str(name)
    }
}

/// Kind-specific event data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventPayload {
    /// A console call
    Console {
        /// Severity
        level: ConsoleLevel,
        /// Arguments joined with spaces
        text: String,
        /// Source location, if known
        source: Option<String>,
    },
    /// An uncaught page error
    PageError {
        /// Error message
        message: String,
        /// Stack trace, if known
        stack: Option<String>,
    },
    /// Renderer crash
    Crash {
        /// Crash description
        reason: String,
    },
    /// Failed request
    RequestFailed {
        /// Request URL
        url: String,
        /// Failure cause
        reason: String,
    },
    /// Request that got a response
    RequestSucceeded {
        /// Response URL
        url: String,
        /// HTTP status (0 if the browser reported an invalid one)
        status: u16,
    },
}

impl EventPayload {
    /// The kind this payload belongs to.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Console { .. } => EventKind::Console,
            EventPayload::PageError { .. } => EventKind::PageError,
            EventPayload::Crash { .. } => EventKind::Crash,
            EventPayload::RequestFailed { .. } => EventKind::RequestFailed,
            EventPayload::RequestSucceeded { .. } => EventKind::RequestSucceeded,
        }
    }
}

/// One normalized, ordered record of a session occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedEvent {
    /// Position in the session's log, starting at 1
    pub sequence: u64,
    /// Wall-clock capture time
    pub timestamp: DateTime<Utc>,
    /// Event kind
    pub kind: EventKind,
    /// Kind-specific data
    pub payload: EventPayload,
}

impl CapturedEvent {
    /// One-line human description.
    #[must_use]
    pub fn summary(&self) -> String {
        match &self.payload {
            EventPayload::Console { level, text, .. } => format!("[{level:?}] {text}"),
            EventPayload::PageError { message, .. } => format!("page error: {message}"),
            EventPayload::Crash { reason } => format!("renderer crashed: {reason}"),
            EventPayload::RequestFailed { url, reason } => format!("request failed: {url} - {reason}"),
            EventPayload::RequestSucceeded { url, status } => format!("{status} {url}"),
        }
    }
}

/// Per-kind event totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCounts {
    /// Console messages
    pub console: usize,
    /// Page errors
    pub page_error: usize,
    /// Crash notifications
    pub crash: usize,
    /// Failed requests
    pub request_failed: usize,
    /// Requests with a response
    pub request_succeeded: usize,
}

impl EventCounts {
    /// Total for one kind.
    #[must_use]
    pub fn get(&self, kind: EventKind) -> usize {
        match kind {
            EventKind::Console => self.console,
            EventKind::PageError => self.page_error,
            EventKind::Crash => self.crash,
            EventKind::RequestFailed => self.request_failed,
            EventKind::RequestSucceeded => self.request_succeeded,
        }
    }

    /// Sum over all kinds.
    #[must_use]
    pub fn total(&self) -> usize {
        self.console + self.page_error + self.crash + self.request_failed + self.request_succeeded
    }

    fn bump(&mut self, kind: EventKind) {
        match kind {
            EventKind::Console => self.console += 1,
            EventKind::PageError => self.page_error += 1,
            EventKind::Crash => self.crash += 1,
            EventKind::RequestFailed => self.request_failed += 1,
            EventKind::RequestSucceeded => self.request_succeeded += 1,
        }
    }
}

/// An immutable copy of a session's log.
///
/// Cheap to clone; reports and callers share the same allocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventLog(Arc<[CapturedEvent]>);

impl EventLog {
    /// Per-kind totals of this log.
    #[must_use]
    pub fn counts(&self) -> EventCounts {
        let mut counts = EventCounts::default();
        for event in self.0.iter() {
            counts.bump(event.kind);
        }
        counts
    }

    /// Events of one kind, in order.
    #[must_use]
    pub fn of_kind(&self, kind: EventKind) -> Vec<&CapturedEvent> {
        self.0.iter().filter(|e| e.kind == kind).collect()
    }

    /// Console message texts, in order.
    #[must_use]
    pub fn console_texts(&self) -> Vec<&str> {
        self.0
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::Console { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Error-level console messages.
    #[must_use]
    pub fn console_errors(&self) -> Vec<&CapturedEvent> {
        self.0
            .iter()
            .filter(|e| matches!(&e.payload, EventPayload::Console { level, .. } if level.is_error()))
            .collect()
    }

    /// Newline-delimited JSON dump, one event per line.
    ///
    /// # Errors
    ///
    /// Returns an error if an event cannot be serialized.
    pub fn to_jsonl(&self) -> Result<String> {
        let mut out = String::new();
        for event in self.0.iter() {
            out.push_str(&serde_json::to_string(event)?);
            out.push('\n');
        }
        Ok(out)
    }
}

impl Deref for EventLog {
    type Target = [CapturedEvent];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<CapturedEvent>> for EventLog {
    fn from(events: Vec<CapturedEvent>) -> Self {
        Self(events.into())
    }
}

impl Serialize for EventLog {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EventLog {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Vec::<CapturedEvent>::deserialize(deserializer).map(Self::from)
    }
}

/// In-flight request state, consumed by the network-quiescent strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkActivity {
    /// Requests started but not finished or failed
    pub in_flight: usize,
    /// Last time any request started, finished or failed
    pub last_activity: Instant,
    /// Requests seen since attach
    pub total: u64,
}

impl NetworkActivity {
    fn new() -> Self {
        Self {
            in_flight: 0,
            last_activity: Instant::now(),
            total: 0,
        }
    }
}

/// Recorder settings for one session.
#[derive(Debug, Clone)]
pub struct RecorderOptions {
    /// Session id used in echoed output
    pub session_id: String,
    /// Re-emit every event through `tracing` after it is recorded
    pub echo: bool,
}

enum Command {
    Record(EventPayload),
    NewDocument,
    Flush(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
}

/// Source events handled per flush or close before replying.
const DRAIN_BUDGET: usize = 4096;

/// Ends seen before their start are forgotten past this many.
const MAX_SETTLED_EARLY: usize = 256;

/// Write handle for events that originate inside the harness itself
/// (for example a mock that failed to fulfill).
///
/// Events sent after the session closes are discarded.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Command>,
}

impl EventSink {
    /// Records a failed request.
    pub fn request_failed(&self, url: impl Into<String>, reason: impl Into<String>) {
        self.record(EventPayload::RequestFailed {
            url: url.into(),
            reason: reason.into(),
        });
    }

    /// A sink whose events go nowhere.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        let (tx, _) = mpsc::unbounded_channel();
        Self { tx }
    }

    /// Records an arbitrary payload.
    pub fn record(&self, payload: EventPayload) {
        // closed sessions no longer record
        let _ = self.tx.send(Command::Record(payload));
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Record(p) => f.debug_tuple("Record").field(p).finish(),
            Command::NewDocument => f.write_str("NewDocument"),
            Command::Flush(_) => f.write_str("Flush"),
            Command::Close(_) => f.write_str("Close"),
        }
    }
}

#[derive(Debug, Default)]
struct LogState {
    events: Vec<CapturedEvent>,
    counts: EventCounts,
}

/// Subscribes to a page's event sources and keeps the session's ordered log.
#[derive(Debug)]
pub struct EventRecorder {
    log: Arc<RwLock<LogState>>,
    commands: mpsc::UnboundedSender<Command>,
    network: watch::Receiver<NetworkActivity>,
    task: Option<JoinHandle<()>>,
}

impl EventRecorder {
    /// Subscribes to all four sources of `driver` and starts recording.
    ///
    /// Crash notifications also mark `lifecycle` as crashed.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver refuses the subscription.
    pub async fn attach(
        driver: &dyn PageDriver,
        options: RecorderOptions,
        lifecycle: LifecycleCell,
    ) -> Result<Self> {
        let streams = driver.subscribe().await?;
        Ok(Self::from_streams(streams, options, lifecycle))
    }

    /// Starts recording from already-subscribed streams.
    #[must_use]
    pub fn from_streams(
        streams: DriverStreams,
        options: RecorderOptions,
        lifecycle: LifecycleCell,
    ) -> Self {
        let log = Arc::new(RwLock::new(LogState::default()));
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (network_tx, network) = watch::channel(NetworkActivity::new());

        let writer = Writer {
            options,
            next_sequence: 1,
            log: log.clone(),
            network: network_tx,
            requests: HashMap::new(),
            settled_early: HashSet::new(),
            lifecycle,
        };
        let task = tokio::spawn(writer.run(streams, command_rx));

        Self {
            log,
            commands,
            network,
            task: Some(task),
        }
    }

    /// Handle for harness-originated events.
    #[must_use]
    pub fn sink(&self) -> EventSink {
        EventSink {
            tx: self.commands.clone(),
        }
    }

    /// Copies the log as it is right now. Later events are not included.
    #[must_use]
    pub fn snapshot(&self) -> EventLog {
        EventLog::from(self.log.read().events.clone())
    }

    /// Per-kind totals.
    #[must_use]
    pub fn counts(&self) -> EventCounts {
        self.log.read().counts
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.log.read().events.len()
    }

    /// True if nothing was recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reason of the first recorded crash, if any.
    #[must_use]
    pub fn crash_reason(&self) -> Option<String> {
        self.log.read().events.iter().find_map(|e| match &e.payload {
            EventPayload::Crash { reason } => Some(reason.clone()),
            _ => None,
        })
    }

    /// Network activity feed.
    #[must_use]
    pub fn network_activity(&self) -> watch::Receiver<NetworkActivity> {
        self.network.clone()
    }

    /// Waits until every event already delivered by the sources is in the log.
    ///
    /// Returns immediately once the recorder is closed.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Forgets requests of the previous document before a navigation.
    ///
    /// Requests that never settled would otherwise hold network quiescence
    /// off for the rest of the session.
    pub fn new_document(&self) {
        let _ = self.commands.send(Command::NewDocument);
    }

    /// Stops recording and returns the final log.
    ///
    /// Subscriptions are dropped before this returns; nothing is appended
    /// afterwards.
    pub async fn close(&mut self) -> EventLog {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Close(tx)).is_ok() {
            let _ = rx.await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.snapshot()
    }

    /// True once [`close`](Self::close) has completed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.task.is_none()
    }
}

impl Drop for EventRecorder {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Writer {
    options: RecorderOptions,
    next_sequence: u64,
    log: Arc<RwLock<LogState>>,
    network: watch::Sender<NetworkActivity>,
    requests: HashMap<String, String>,
    settled_early: HashSet<String>,
    lifecycle: LifecycleCell,
}

struct Sources {
    crashes: Fuse<BoxStream<'static, RawCrash>>,
    page_errors: Fuse<BoxStream<'static, RawPageError>>,
    console: Fuse<BoxStream<'static, RawConsole>>,
    network: Fuse<BoxStream<'static, RawNetwork>>,
}

impl Writer {
    async fn run(mut self, streams: DriverStreams, mut commands: mpsc::UnboundedReceiver<Command>) {
        // a source may end before the session does (browser gone)
        let mut sources = Sources {
            crashes: streams.crashes.fuse(),
            page_errors: streams.page_errors.fuse(),
            console: streams.console.fuse(),
            network: streams.network.fuse(),
        };

        let reply = loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(Command::Record(payload)) => self.append(payload),
                    Some(Command::NewDocument) => self.forget_requests(),
                    Some(Command::Flush(done)) => {
                        tokio::task::unconstrained(self.drain_ready(&mut sources)).await;
                        let _ = done.send(());
                    }
                    Some(Command::Close(done)) => {
                        tokio::task::unconstrained(self.drain_ready(&mut sources)).await;
                        break Some(done);
                    }
                    None => break None,
                },
                Some(crash) = sources.crashes.next() => self.on_crash(crash),
                Some(error) = sources.page_errors.next() => self.append(coerce_page_error(error)),
                Some(entry) = sources.console.next() => self.append(coerce_console(entry)),
                Some(activity) = sources.network.next() => self.on_network(activity),
            }
        };

        drop(sources);
        debug!(session = %self.options.session_id, events = self.next_sequence - 1, "recorder closed");
        if let Some(done) = reply {
            let _ = done.send(());
        }
    }

    /// Records what the sources have already delivered, crashes first,
    /// without waiting for more. Runs unconstrained so the cooperative budget
    /// cannot make a delivered event look pending.
    async fn drain_ready(&mut self, sources: &mut Sources) {
        for _ in 0..DRAIN_BUDGET {
            if let Some(Some(crash)) = sources.crashes.next().now_or_never() {
                self.on_crash(crash);
            } else if let Some(Some(error)) = sources.page_errors.next().now_or_never() {
                self.append(coerce_page_error(error));
            } else if let Some(Some(entry)) = sources.console.next().now_or_never() {
                self.append(coerce_console(entry));
            } else if let Some(Some(activity)) = sources.network.next().now_or_never() {
                self.on_network(activity);
            } else {
                return;
            }
        }
        debug!(session = %self.options.session_id, "drain budget spent");
    }

    fn append(&mut self, payload: EventPayload) {
        let event = CapturedEvent {
            sequence: self.next_sequence,
            timestamp: Utc::now(),
            kind: payload.kind(),
            payload,
        };
        self.next_sequence += 1;

        if self.options.echo {
            info!(
                target: "spa_probe::events",
                session = %self.options.session_id,
                seq = event.sequence,
                kind = %event.kind,
                "{}",
                event.summary()
            );
        }

        let mut log = self.log.write();
        log.counts.bump(event.kind);
        log.events.push(event);
    }

    fn on_crash(&mut self, crash: RawCrash) {
        let reason = crash
            .reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| "renderer process terminated".to_string());
        self.append(EventPayload::Crash { reason });
        self.lifecycle.mark_crashed();
    }

    fn on_network(&mut self, event: RawNetwork) {
        match event {
            RawNetwork::Started { id, url } => {
                // sources are independent streams; the end of a request can overtake its start
                let open = !self.settled_early.remove(&id);
                // a redirect starts the same request again
                let open = open && self.requests.insert(id, url).is_none();
                self.network.send_modify(|n| {
                    if open {
                        n.in_flight += 1;
                    }
                    n.total += 1;
                    n.last_activity = Instant::now();
                });
            }
            RawNetwork::Responded { id, url, status } => {
                let url = if url.is_empty() { self.url_for(&id) } else { url };
                let status = u16::try_from(status).unwrap_or(0);
                self.append(EventPayload::RequestSucceeded { url, status });
            }
            RawNetwork::Finished { id } => {
                self.settle(&id);
            }
            RawNetwork::Failed {
                id,
                error_text,
                canceled,
            } => {
                let url = self.url_for(&id);
                self.settle(&id);
                let reason = match error_text.filter(|t| !t.is_empty()) {
                    Some(text) => text,
                    None if canceled => "canceled".to_string(),
                    None => "unknown failure".to_string(),
                };
                self.append(EventPayload::RequestFailed { url, reason });
            }
        }
    }

    fn forget_requests(&mut self) {
        if !self.requests.is_empty() {
            debug!(session = %self.options.session_id, stale = self.requests.len(), "forgetting unsettled requests");
        }
        self.requests.clear();
        self.settled_early.clear();
        self.network.send_modify(|n| n.in_flight = 0);
    }

    fn url_for(&self, id: &str) -> String {
        self.requests
            .get(id)
            .cloned()
            .unwrap_or_else(|| "<unknown url>".to_string())
    }

    fn settle(&mut self, id: &str) {
        let known = self.requests.remove(id).is_some();
        if !known {
            if self.settled_early.len() >= MAX_SETTLED_EARLY {
                self.settled_early.clear();
            }
            self.settled_early.insert(id.to_string());
        }
        self.network.send_modify(|n| {
            if known {
                n.in_flight = n.in_flight.saturating_sub(1);
            }
            n.last_activity = Instant::now();
        });
    }
}

fn coerce_console(raw: RawConsole) -> EventPayload {
    let text = if raw.args.is_empty() {
        "<empty>".to_string()
    } else {
        raw.args
            .iter()
            .map(|arg| match arg {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    };

    EventPayload::Console {
        level: ConsoleLevel::from(raw.level.as_str()),
        text,
        source: raw.source,
    }
}

fn coerce_page_error(raw: RawPageError) -> EventPayload {
    let message = raw
        .message
        .filter(|m| !m.trim().is_empty())
        .or_else(|| match raw.description {
            Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s),
            Some(serde_json::Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        })
        .unwrap_or_else(|| "<unknown page error>".to_string());

    EventPayload::PageError {
        message,
        stack: raw.stack,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Lifecycle;
    use futures::stream;
    use serde_json::json;

    struct Feeds {
        console: mpsc::UnboundedSender<RawConsole>,
        errors: mpsc::UnboundedSender<RawPageError>,
        crashes: mpsc::UnboundedSender<RawCrash>,
        network: mpsc::UnboundedSender<RawNetwork>,
    }

    fn recorder(echo: bool) -> (EventRecorder, Feeds, LifecycleCell) {
        let (console, console_rx) = mpsc::unbounded_channel();
        let (errors, errors_rx) = mpsc::unbounded_channel();
        let (crashes, crashes_rx) = mpsc::unbounded_channel();
        let (network, network_rx) = mpsc::unbounded_channel();
        let streams = DriverStreams {
            console: stream::unfold(console_rx, |mut rx| async move { rx.recv().await.map(|v| (v, rx)) }).boxed(),
            page_errors: stream::unfold(errors_rx, |mut rx| async move { rx.recv().await.map(|v| (v, rx)) }).boxed(),
            crashes: stream::unfold(crashes_rx, |mut rx| async move { rx.recv().await.map(|v| (v, rx)) }).boxed(),
            network: stream::unfold(network_rx, |mut rx| async move { rx.recv().await.map(|v| (v, rx)) }).boxed(),
        };
        let lifecycle = LifecycleCell::new();
        let recorder = EventRecorder::from_streams(
            streams,
            RecorderOptions {
                session_id: "test".into(),
                echo,
            },
            lifecycle.clone(),
        );
        (
            recorder,
            Feeds {
                console,
                errors,
                crashes,
                network,
            },
            lifecycle,
        )
    }

    fn console(level: &str, args: Vec<serde_json::Value>) -> RawConsole {
        RawConsole {
            level: level.into(),
            args,
            source: None,
        }
    }

    #[tokio::test]
    async fn events_from_all_sources_share_one_sequence() {
        let (recorder, feeds, _) = recorder(false);

        feeds.console.send(console("log", vec![json!("boot")])).unwrap();
        feeds
            .errors
            .send(RawPageError {
                message: Some("ReferenceError: x is not defined".into()),
                ..Default::default()
            })
            .unwrap();
        feeds
            .network
            .send(RawNetwork::Started {
                id: "1".into(),
                url: "http://app/api".into(),
            })
            .unwrap();
        feeds
            .network
            .send(RawNetwork::Failed {
                id: "1".into(),
                error_text: Some("net::ERR_CONNECTION_REFUSED".into()),
                canceled: false,
            })
            .unwrap();
        feeds.console.send(console("error", vec![json!("boom")])).unwrap();

        recorder.flush().await;
        let log = recorder.snapshot();

        assert_eq!(log.len(), 4);
        let sequences: Vec<u64> = log.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);

        let counts = recorder.counts();
        assert_eq!(counts.console, 2);
        assert_eq!(counts.page_error, 1);
        assert_eq!(counts.request_failed, 1);
        assert_eq!(counts.crash, 0);

        let failed = log.of_kind(EventKind::RequestFailed);
        assert_eq!(
            failed[0].payload,
            EventPayload::RequestFailed {
                url: "http://app/api".into(),
                reason: "net::ERR_CONNECTION_REFUSED".into()
            }
        );
        assert_eq!(log.console_errors().len(), 1);
    }

    #[tokio::test]
    async fn malformed_payloads_are_coerced_not_dropped() {
        let (recorder, feeds, _) = recorder(false);

        feeds.console.send(console("table", vec![json!({"a": 1}), json!(null)])).unwrap();
        feeds.console.send(console("log", vec![])).unwrap();
        feeds
            .errors
            .send(RawPageError {
                message: Some("  ".into()),
                description: Some(json!({"name": "TypeError"})),
                stack: None,
            })
            .unwrap();
        feeds.errors.send(RawPageError::default()).unwrap();
        feeds
            .network
            .send(RawNetwork::Responded {
                id: "404".into(),
                url: String::new(),
                status: 70_000,
            })
            .unwrap();

        recorder.flush().await;
        let log = recorder.snapshot();
        assert_eq!(log.len(), 5);
        assert_eq!(log.console_texts(), vec![r#"{"a":1} null"#, "<empty>"]);
        assert!(matches!(
            &log.of_kind(EventKind::Console)[0].payload,
            EventPayload::Console { level: ConsoleLevel::Other, .. }
        ));
        let messages: Vec<&str> = log
            .of_kind(EventKind::PageError)
            .into_iter()
            .filter_map(|e| match &e.payload {
                EventPayload::PageError { message, .. } => Some(message.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(messages, vec![r#"{"name":"TypeError"}"#, "<unknown page error>"]);
        assert_eq!(
            log.of_kind(EventKind::RequestSucceeded)[0].payload,
            EventPayload::RequestSucceeded {
                url: "<unknown url>".into(),
                status: 0
            }
        );
    }

    #[tokio::test]
    async fn snapshot_is_a_point_in_time_copy() {
        let (recorder, feeds, _) = recorder(true);

        feeds.console.send(console("log", vec![json!("one")])).unwrap();
        recorder.flush().await;
        let first = recorder.snapshot();

        feeds.console.send(console("log", vec![json!("two")])).unwrap();
        recorder.flush().await;
        let second = recorder.snapshot();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 2);
        assert_eq!(first[0], second[0]);
    }

    #[tokio::test]
    async fn crash_marks_lifecycle_and_is_recorded() {
        let (recorder, feeds, lifecycle) = recorder(false);
        lifecycle.advance(Lifecycle::Intercepting).unwrap();

        feeds.crashes.send(RawCrash { reason: None }).unwrap();
        recorder.flush().await;

        assert_eq!(lifecycle.get(), Lifecycle::Crashed);
        assert_eq!(recorder.counts().crash, 1);
        assert_eq!(recorder.crash_reason().as_deref(), Some("renderer process terminated"));
    }

    #[tokio::test]
    async fn network_activity_tracks_in_flight_requests() {
        let (recorder, feeds, _) = recorder(false);
        let activity = recorder.network_activity();

        for id in ["a", "b"] {
            feeds
                .network
                .send(RawNetwork::Started {
                    id: id.into(),
                    url: format!("http://app/{id}"),
                })
                .unwrap();
        }
        recorder.flush().await;
        assert_eq!(activity.borrow().in_flight, 2);

        feeds.network.send(RawNetwork::Finished { id: "a".into() }).unwrap();
        feeds.network.send(RawNetwork::Finished { id: "zzz".into() }).unwrap();
        recorder.flush().await;
        assert_eq!(activity.borrow().in_flight, 1);
        assert_eq!(activity.borrow().total, 2);
    }

    #[tokio::test]
    async fn redirects_count_once_and_navigation_forgets_stale_requests() {
        let (recorder, feeds, _) = recorder(false);
        let activity = recorder.network_activity();

        for url in ["http://app/old", "http://app/new"] {
            feeds
                .network
                .send(RawNetwork::Started {
                    id: "r".into(),
                    url: url.into(),
                })
                .unwrap();
        }
        feeds.network.send(RawNetwork::Finished { id: "r".into() }).unwrap();
        feeds
            .network
            .send(RawNetwork::Started {
                id: "poll".into(),
                url: "http://app/webapi/events".into(),
            })
            .unwrap();
        recorder.flush().await;
        assert_eq!(activity.borrow().in_flight, 1);

        recorder.new_document();
        recorder.flush().await;
        assert_eq!(activity.borrow().in_flight, 0);

        feeds.network.send(RawNetwork::Finished { id: "poll".into() }).unwrap();
        recorder.flush().await;
        assert_eq!(activity.borrow().in_flight, 0);
    }

    #[tokio::test]
    async fn flush_waits_for_a_backlog_of_delivered_events() {
        let (recorder, feeds, _) = recorder(false);
        let sink = recorder.sink();

        for n in 0..1_000 {
            feeds.console.send(console("log", vec![json!(n)])).unwrap();
        }
        sink.request_failed("http://app/late.js", "net::ERR_ABORTED");
        recorder.flush().await;

        let counts = recorder.counts();
        assert_eq!(counts.console, 1_000);
        assert_eq!(counts.request_failed, 1);
        let log = recorder.snapshot();
        let texts = log.console_texts();
        assert_eq!(texts.first(), Some(&"0"));
        assert_eq!(texts.last(), Some(&"999"));
    }

    #[tokio::test]
    async fn nothing_is_recorded_after_close() {
        let (mut recorder, feeds, _) = recorder(false);
        let sink = recorder.sink();

        feeds.console.send(console("log", vec![json!("before")])).unwrap();
        recorder.flush().await;
        let closed = recorder.close().await;
        assert!(recorder.is_closed());

        sink.request_failed("http://late", "after close");
        let _ = feeds.console.send(console("log", vec![json!("after")]));
        recorder.flush().await;

        assert_eq!(closed.console_texts(), vec!["before"]);
        assert_eq!(recorder.snapshot(), closed);
    }

    #[test]
    fn log_dumps_as_json_lines() {
        let log = EventLog::from(vec![CapturedEvent {
            sequence: 1,
            timestamp: Utc::now(),
            kind: EventKind::Crash,
            payload: EventPayload::Crash {
                reason: "oom".into(),
            },
        }]);
        let dump = log.to_jsonl().unwrap();
        assert_eq!(dump.lines().count(), 1);
        let value: serde_json::Value = serde_json::from_str(dump.trim()).unwrap();
        assert_eq!(value["kind"], "crash");
        assert_eq!(value["payload"]["type"], "crash");
        assert_eq!(value["sequence"], 1);
    }

    #[test]
    fn console_level_classification() {
        assert!(ConsoleLevel::Error.is_error());
        assert!(!ConsoleLevel::Warning.is_error());
        assert!(ConsoleLevel::Warning.is_warning_or_error());
        assert_eq!(ConsoleLevel::from("warn"), ConsoleLevel::Warning);
        assert_eq!(ConsoleLevel::from("dir"), ConsoleLevel::Other);
    }
}
