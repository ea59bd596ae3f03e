//! Targets the harness talks to: the SPA under test and its back end.
//!
//! The SPA is only ever reached through the browser, so all the harness needs
//! is a base URL ([`AppServer`]). The back end is also probed directly over
//! HTTP ([`BackendProbe`]) so a report can tell "the front end broke" apart
//! from "the API was down".

use crate::error::{ProbeError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Endpoints probed when no explicit list is given.
pub const DEFAULT_BACKEND_ENDPOINTS: &[&str] = &["/webapi/health", "/webapi/oem/settings", "/health"];

/// Characters of response body kept in an [`EndpointStatus`].
const BODY_PREVIEW_CHARS: usize = 100;

/// A running application the browser can navigate to.
///
/// Implement this for servers started by the test itself; use
/// [`StaticUrlServer`] for one that is already running.
#[async_trait]
pub trait AppServer: Send + Sync {
    /// Base URL of the application, e.g. `http://localhost:8080/admin-next`.
    fn base_url(&self) -> &str;

    /// Called before navigation to fail fast when the server is down.
    ///
    /// The default assumes the server is healthy.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    /// Joins `path` onto the base URL with exactly one slash between them.
    fn url(&self, path: &str) -> String {
        let base = self.base_url().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }
}

impl fmt::Debug for dyn AppServer + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppServer")
            .field("base_url", &self.base_url())
            .finish()
    }
}

/// An application that is already running at a fixed URL.
#[derive(Debug, Clone)]
pub struct StaticUrlServer {
    base_url: String,
}

impl StaticUrlServer {
    /// Creates a server handle for `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl AppServer for StaticUrlServer {
    fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// What one back-end endpoint answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStatus {
    /// Full URL requested
    pub url: String,
    /// HTTP status, absent when the request never completed
    pub status: Option<u16>,
    /// Reason phrase for the status
    pub reason: Option<String>,
    /// First characters of the body
    pub body_preview: Option<String>,
    /// Transport error, if any
    pub error: Option<String>,
}

impl EndpointStatus {
    /// True for a 2xx answer.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_some_and(|s| (200..300).contains(&s))
    }
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.status, &self.error) {
            (Some(status), _) => {
                write!(f, "{} -> {status} {}", self.url, self.reason.as_deref().unwrap_or(""))?;
                if let Some(body) = &self.body_preview {
                    write!(f, " | {body}")?;
                }
                Ok(())
            }
            (None, Some(error)) => write!(f, "{} -> error: {error}", self.url),
            (None, None) => write!(f, "{} -> no answer", self.url),
        }
    }
}

/// Direct HTTP probe of the back end, bypassing the SPA.
#[derive(Debug, Clone)]
pub struct BackendProbe {
    base_url: String,
    endpoints: Vec<String>,
    client: reqwest::Client,
}

impl BackendProbe {
    /// Creates a probe for the default endpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            endpoints: DEFAULT_BACKEND_ENDPOINTS.iter().map(|s| (*s).to_string()).collect(),
            client,
        })
    }

    /// Replaces the endpoint list.
    #[must_use]
    pub fn with_endpoints<I, S>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.endpoints = endpoints.into_iter().map(Into::into).collect();
        self
    }

    /// Base URL being probed.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Probes every endpoint in order. Never fails; errors are recorded per endpoint.
    pub async fn run(&self) -> Vec<EndpointStatus> {
        let mut results = Vec::with_capacity(self.endpoints.len());
        for endpoint in &self.endpoints {
            results.push(self.probe(endpoint).await);
        }
        results
    }

    async fn probe(&self, endpoint: &str) -> EndpointStatus {
        let url = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );
        debug!(%url, "probing back end");

        match self.fetch(&url).await {
            Ok((status, body)) => EndpointStatus {
                url,
                status: Some(status.as_u16()),
                reason: status.canonical_reason().map(str::to_string),
                body_preview: Some(body.chars().take(BODY_PREVIEW_CHARS).collect()),
                error: None,
            },
            Err(e) => EndpointStatus {
                url,
                status: None,
                reason: None,
                body_preview: None,
                error: Some(e.to_string()),
            },
        }
    }

    async fn fetch(&self, url: &str) -> Result<(reqwest::StatusCode, String)> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await.map_err(ProbeError::from)?;
        Ok((status, body))
    }
}
