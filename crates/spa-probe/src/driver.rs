//! The page-driver seam between the harness and a concrete browser.
//!
//! Everything the harness needs from a page goes through [`PageDriver`]:
//! navigation, DOM probes, artifacts, interception and the raw asynchronous
//! event streams. The Chrome implementation lives in [`crate::page`]; the
//! in-memory [`crate::scripted::ScriptedPage`] implements the same trait for
//! tests and offline use.

use crate::error::Result;
use crate::intercept::Interceptor;
use crate::recorder::EventSink;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;

/// A console call as delivered by the browser, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawConsole {
    /// Console API name (`log`, `warning`, `error`, ...)
    pub level: String,
    /// Call arguments; non-string values are stringified by the recorder
    pub args: Vec<serde_json::Value>,
    /// `url:line:column` of the first stack frame, when known
    pub source: Option<String>,
}

/// An uncaught script error.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawPageError {
    /// Exception message text, if the browser supplied one
    pub message: Option<String>,
    /// Raw exception object/description for the fallback path
    pub description: Option<serde_json::Value>,
    /// Formatted stack trace
    pub stack: Option<String>,
}

/// Renderer crash notification.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawCrash {
    /// Browser-supplied reason, often absent
    pub reason: Option<String>,
}

/// Network activity for one request, keyed by the browser's request id.
#[derive(Debug, Clone, PartialEq)]
pub enum RawNetwork {
    /// A request left the page
    Started {
        /// Browser request id
        id: String,
        /// Request URL
        url: String,
    },
    /// Response headers arrived
    Responded {
        /// Browser request id
        id: String,
        /// Response URL
        url: String,
        /// HTTP status as reported (may be out of range)
        status: i64,
    },
    /// The body finished loading
    Finished {
        /// Browser request id
        id: String,
    },
    /// The request failed or was cancelled
    Failed {
        /// Browser request id
        id: String,
        /// Browser error text (`net::ERR_...`)
        error_text: Option<String>,
        /// True when the page cancelled the request itself
        canceled: bool,
    },
}

/// The four independent event sources of one page.
pub struct DriverStreams {
    /// Console output
    pub console: BoxStream<'static, RawConsole>,
    /// Uncaught page errors
    pub page_errors: BoxStream<'static, RawPageError>,
    /// Renderer crash notifications
    pub crashes: BoxStream<'static, RawCrash>,
    /// Request lifecycle notifications
    pub network: BoxStream<'static, RawNetwork>,
}

impl fmt::Debug for DriverStreams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverStreams").finish_non_exhaustive()
    }
}

/// One browser page under the harness's control.
///
/// Implementations must scope every effect (interception, subscriptions,
/// viewport) to the page itself so concurrent sessions cannot observe each
/// other.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Subscribes to the page's raw event sources. Called once per page.
    async fn subscribe(&self) -> Result<DriverStreams>;

    /// Routes every outgoing request of this page through `interceptor`.
    ///
    /// Fulfillment failures are reported through `sink` as failed requests.
    async fn enable_interception(&self, interceptor: Arc<Interceptor>, sink: EventSink)
        -> Result<()>;

    /// Starts navigation and resolves once the browser has committed it.
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Returns `document.readyState`.
    async fn ready_state(&self) -> Result<String>;

    /// Returns true if `selector` matches an element in the rendered tree.
    async fn selector_present(&self, selector: &str) -> Result<bool>;

    /// Returns the current page URL.
    async fn current_url(&self) -> Result<String>;

    /// Returns the document title.
    async fn title(&self) -> Result<String>;

    /// Returns the serialized document HTML.
    async fn content(&self) -> Result<String>;

    /// Returns the rendered text of `<body>`.
    async fn body_text(&self) -> Result<String>;

    /// Evaluates a script in the page and returns its JSON value.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Captures a PNG screenshot.
    async fn screenshot(&self) -> Result<Vec<u8>>;

    /// Overrides the viewport size.
    async fn set_viewport(&self, width: u32, height: u32) -> Result<()>;

    /// Closes the page and releases browser-side resources.
    async fn close(&self) -> Result<()>;
}

impl fmt::Debug for dyn PageDriver + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageDriver").finish_non_exhaustive()
    }
}

/// Script used by drivers to describe the application shell (`#app`).
pub const SHELL_STATUS_SCRIPT: &str = r#"(() => {
    const app = document.getElementById('app');
    return {
        appExists: !!app,
        appChildren: app ? app.children.length : 0,
        appInnerHtml: app && app.innerHTML ? app.innerHTML.substring(0, 500) : '',
        scriptCount: document.querySelectorAll('script').length,
        stylesheetCount: document.querySelectorAll('link[rel="stylesheet"], style').length,
        bodyClass: document.body ? document.body.className : ''
    };
})()"#;
