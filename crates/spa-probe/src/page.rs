//! [`PageDriver`] over a real Chrome tab.
//!
//! Raw events come straight from the DevTools protocol:
//!
//! | source       | CDP event                                    |
//! |--------------|----------------------------------------------|
//! | console      | `Runtime.consoleAPICalled`                   |
//! | page errors  | `Runtime.exceptionThrown`                    |
//! | crashes      | `Inspector.targetCrashed`                    |
//! | network      | `Network.requestWillBeSent` / `responseReceived` / `loadingFinished` / `loadingFailed` |
//!
//! Interception pauses every request of this tab with `Fetch.enable` and
//! answers each one from the session's [`Interceptor`]: matching requests
//! are fulfilled locally, the rest continue to the network. Nothing is
//! configured at browser level, so tabs of concurrent sessions never share
//! rules.

use crate::driver::{DriverStreams, PageDriver, RawConsole, RawCrash, RawNetwork, RawPageError};
use crate::error::{ProbeError, Result};
use crate::intercept::{Decision, Interceptor, MockResponse};
use crate::recorder::EventSink;
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, ContinueRequestParams, EventRequestPaused, FailRequestParams, FulfillRequestParams, HeaderEntry,
    RequestPattern,
};
use chromiumoxide::cdp::browser_protocol::inspector::{self, EventTargetCrashed};
use chromiumoxide::cdp::browser_protocol::network::{
    self, ErrorReason, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived,
};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::js_protocol::runtime::{
    ConsoleApiCalledType, EventConsoleApiCalled, EventExceptionThrown, RemoteObject,
};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use futures::stream;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One Chrome tab driven over CDP.
#[derive(Debug)]
pub struct ChromePage {
    inner: Page,
    interception: Mutex<Option<JoinHandle<()>>>,
    /// Why a mock could not be fulfilled, by network request id, until
    /// Chrome reports the request as failed.
    mock_failures: Arc<Mutex<HashMap<String, String>>>,
}

impl ChromePage {
    pub(crate) fn new(page: Page) -> Self {
        Self {
            inner: page,
            interception: Mutex::new(None),
            mock_failures: Arc::default(),
        }
    }

    /// The underlying chromiumoxide page, for CDP calls the driver does not cover.
    #[must_use]
    pub fn raw(&self) -> &Page {
        &self.inner
    }

    async fn eval_value(&self, script: &str) -> Result<Value> {
        let result = self
            .inner
            .evaluate(script)
            .await
            .map_err(|e| ProbeError::ScriptExecutionFailed(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn eval_string(&self, script: &str) -> Result<String> {
        match self.eval_value(script).await? {
            Value::String(s) => Ok(s),
            Value::Null => Ok(String::new()),
            other => Ok(other.to_string()),
        }
    }
}

#[async_trait]
impl PageDriver for ChromePage {
    async fn subscribe(&self) -> Result<DriverStreams> {
        self.inner.execute(network::EnableParams::default()).await?;
        self.inner.execute(inspector::EnableParams::default()).await?;

        let console = self.inner.event_listener::<EventConsoleApiCalled>().await?;
        let errors = self.inner.event_listener::<EventExceptionThrown>().await?;
        let crashes = self.inner.event_listener::<EventTargetCrashed>().await?;
        let started = self.inner.event_listener::<EventRequestWillBeSent>().await?;
        let responded = self.inner.event_listener::<EventResponseReceived>().await?;
        let finished = self.inner.event_listener::<EventLoadingFinished>().await?;
        let failed = self.inner.event_listener::<EventLoadingFailed>().await?;

        let mock_failures = self.mock_failures.clone();
        let network = stream::select_all(vec![
            started
                .map(|e| RawNetwork::Started {
                    id: e.request_id.inner().to_string(),
                    url: e.request.url.clone(),
                })
                .boxed(),
            responded
                .map(|e| RawNetwork::Responded {
                    id: e.request_id.inner().to_string(),
                    url: e.response.url.clone(),
                    status: e.response.status,
                })
                .boxed(),
            finished
                .map(|e| RawNetwork::Finished {
                    id: e.request_id.inner().to_string(),
                })
                .boxed(),
            failed
                .map(move |e| {
                    let id = e.request_id.inner().to_string();
                    let error_text = mock_failures.lock().remove(&id).unwrap_or_else(|| e.error_text.clone());
                    RawNetwork::Failed {
                        id,
                        error_text: Some(error_text),
                        canceled: e.canceled.unwrap_or(false),
                    }
                })
                .boxed(),
        ]);

        Ok(DriverStreams {
            console: console.map(|e| raw_console(&e)).boxed(),
            page_errors: errors.map(|e| raw_page_error(&e)).boxed(),
            crashes: crashes.map(|_| RawCrash { reason: None }).boxed(),
            network: network.boxed(),
        })
    }

    async fn enable_interception(&self, interceptor: Arc<Interceptor>, sink: EventSink) -> Result<()> {
        let mut paused = self.inner.event_listener::<EventRequestPaused>().await?;
        self.inner
            .execute(
                fetch::EnableParams::builder()
                    .pattern(RequestPattern::builder().url_pattern("*").build())
                    .build(),
            )
            .await?;

        let page = self.inner.clone();
        let mock_failures = self.mock_failures.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let url = event.request.url.clone();
                match interceptor.decide(&url) {
                    Decision::Fulfill(mock) => {
                        if let Err(e) = fulfill(&page, &event, &mock).await {
                            warn!(%url, error = %e, "mock fulfillment failed");
                            let reason = format!("mock fulfillment failed: {e}");
                            let network_id = event.network_id.as_ref().map(|id| id.inner().to_string());
                            // Chrome reports the failed request itself; its event carries the reason
                            if let Some(id) = &network_id {
                                mock_failures.lock().insert(id.clone(), reason.clone());
                            }
                            let fail = FailRequestParams::new(event.request_id.clone(), ErrorReason::Failed);
                            let failed = page.execute(fail).await;
                            if let Err(e) = &failed {
                                debug!(%url, error = %e, "could not fail paused request");
                            }
                            if failed.is_err() || network_id.is_none() {
                                if let Some(id) = &network_id {
                                    mock_failures.lock().remove(id);
                                }
                                sink.request_failed(&url, reason);
                            }
                        }
                    }
                    Decision::PassThrough => {
                        if let Err(e) = page.execute(ContinueRequestParams::new(event.request_id.clone())).await {
                            debug!(%url, error = %e, "could not continue paused request");
                        }
                    }
                }
            }
        });

        if let Some(previous) = self.interception.lock().replace(task) {
            previous.abort();
        }
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        let response = self
            .inner
            .execute(NavigateParams::new(url))
            .await
            .map_err(|e| ProbeError::NavigationFailed {
                url: url.to_string(),
                reason: e.to_string(),
                report: None,
            })?;

        match &response.result.error_text {
            Some(reason) if !reason.is_empty() => Err(ProbeError::NavigationFailed {
                url: url.to_string(),
                reason: reason.clone(),
                report: None,
            }),
            _ => Ok(()),
        }
    }

    async fn ready_state(&self) -> Result<String> {
        self.eval_string("document.readyState").await
    }

    async fn selector_present(&self, selector: &str) -> Result<bool> {
        let escaped =
            serde_json::to_string(selector).map_err(|e| ProbeError::ScriptExecutionFailed(e.to_string()))?;
        let script = format!("!!document.querySelector({escaped})");
        Ok(self.eval_value(&script).await?.as_bool().unwrap_or(false))
    }

    async fn current_url(&self) -> Result<String> {
        self.eval_string("window.location.href").await
    }

    async fn title(&self) -> Result<String> {
        self.eval_string("document.title").await
    }

    async fn content(&self) -> Result<String> {
        Ok(self.inner.content().await?)
    }

    async fn body_text(&self) -> Result<String> {
        self.eval_string("document.body ? document.body.innerText : ''").await
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        self.eval_value(script).await
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.inner
            .screenshot(ScreenshotParams::default())
            .await
            .map_err(|e| ProbeError::ScriptExecutionFailed(e.to_string()))
    }

    async fn set_viewport(&self, width: u32, height: u32) -> Result<()> {
        let params = SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(width))
            .height(i64::from(height))
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(ProbeError::ConnectionFailed)?;
        self.inner.execute(params).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(task) = self.interception.lock().take() {
            task.abort();
        }
        self.inner.clone().close().await?;
        Ok(())
    }
}

impl Drop for ChromePage {
    fn drop(&mut self) {
        if let Some(task) = self.interception.get_mut().take() {
            task.abort();
        }
    }
}

async fn fulfill(page: &Page, event: &EventRequestPaused, mock: &MockResponse) -> Result<()> {
    let mut headers = Vec::new();
    if let Some(content_type) = &mock.content_type {
        headers.push(HeaderEntry::new("Content-Type", content_type.clone()));
    }
    let params = FulfillRequestParams::builder()
        .request_id(event.request_id.clone())
        .response_code(i64::from(mock.status))
        .response_headers(headers)
        .body(mock.body_base64())
        .build()
        .map_err(|reason| ProbeError::InterceptMismatch {
            pattern: event.request.url.clone(),
            reason,
        })?;
    page.execute(params).await?;
    Ok(())
}

fn console_api_name(kind: &ConsoleApiCalledType) -> &'static str {
    match kind {
        ConsoleApiCalledType::Log => "log",
        ConsoleApiCalledType::Info => "info",
        ConsoleApiCalledType::Warning => "warning",
        ConsoleApiCalledType::Error => "error",
        ConsoleApiCalledType::Debug => "debug",
        ConsoleApiCalledType::Assert => "assert",
        _ => "other",
    }
}

fn remote_value(arg: &RemoteObject) -> Value {
    match (&arg.value, &arg.description) {
        (Some(value), _) => value.clone(),
        (None, Some(description)) => Value::String(description.clone()),
        (None, None) => Value::Null,
    }
}

fn raw_console(event: &EventConsoleApiCalled) -> RawConsole {
    let source = event
        .stack_trace
        .as_ref()
        .and_then(|trace| trace.call_frames.first())
        .map(|frame| format!("{}:{}:{}", frame.url, frame.line_number, frame.column_number));

    RawConsole {
        level: console_api_name(&event.r#type).to_string(),
        args: event.args.iter().map(remote_value).collect(),
        source,
    }
}

fn raw_page_error(event: &EventExceptionThrown) -> RawPageError {
    let details = &event.exception_details;
    let description = details.exception.as_ref().and_then(|e| e.description.clone());
    let message = description
        .as_deref()
        .and_then(|d| d.lines().next())
        .map(str::to_string)
        .or_else(|| Some(details.text.clone()));

    RawPageError {
        message,
        description: details.exception.as_ref().map(remote_value),
        stack: description,
    }
}
