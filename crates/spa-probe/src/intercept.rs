//! Per-session request interception with mocked responses.
//!
//! An [`Interceptor`] is an ordered list of rules, each a URL pattern plus a
//! [`MockResponse`]. The first rule whose pattern matches a request URL
//! fulfills that request; requests matching nothing go to the network
//! untouched. Rules are validated when registered so a bad rule fails the
//! test setup instead of silently letting traffic through.
//!
//! Each session owns its interceptor. There is no global rule table.

use crate::driver::PageDriver;
use crate::error::{ProbeError, Result};
use crate::recorder::EventSink;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A URL pattern, matched against the full request URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlPattern {
    /// Glob syntax: `**` any characters, `*` any characters except `/`,
    /// `?` one character, `{a,b}` alternation.
    Glob(String),
    /// A regular expression searched anywhere in the URL.
    Regex(String),
}

impl UrlPattern {
    /// Creates a regex pattern.
    pub fn regex(expr: impl Into<String>) -> Self {
        UrlPattern::Regex(expr.into())
    }

    /// The pattern text as written by the caller.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            UrlPattern::Glob(s) | UrlPattern::Regex(s) => s,
        }
    }

    fn compile(&self) -> std::result::Result<Regex, String> {
        let expr = match self {
            UrlPattern::Glob(glob) => glob_to_regex(glob)?,
            UrlPattern::Regex(expr) => expr.clone(),
        };
        Regex::new(&expr).map_err(|e| e.to_string())
    }
}

impl From<&str> for UrlPattern {
    fn from(s: &str) -> Self {
        UrlPattern::Glob(s.to_string())
    }
}

impl From<String> for UrlPattern {
    fn from(s: String) -> Self {
        UrlPattern::Glob(s)
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlPattern::Glob(s) => f.write_str(s),
            UrlPattern::Regex(s) => write!(f, "/{s}/"),
        }
    }
}

fn glob_to_regex(glob: &str) -> std::result::Result<String, String> {
    let mut out = String::from("^");
    let mut chars = glob.chars().peekable();
    let mut in_group = false;

    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str(".*");
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push('.'),
            '{' if !in_group => {
                in_group = true;
                out.push_str("(?:");
            }
            '{' => return Err("nested '{' groups are not supported".to_string()),
            '}' if in_group => {
                in_group = false;
                out.push(')');
            }
            ',' if in_group => out.push('|'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    if in_group {
        return Err("unclosed '{' group".to_string());
    }
    out.push('$');
    Ok(out)
}

/// The response served in place of a matched request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResponse {
    /// HTTP status code
    pub status: u16,
    /// `Content-Type` header, omitted when `None`
    pub content_type: Option<String>,
    /// Response body
    pub body: String,
}

impl MockResponse {
    /// A mock with the given status, no content type and an empty body.
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            body: String::new(),
        }
    }

    /// A stylesheet response.
    pub fn css(body: impl Into<String>) -> Self {
        Self::new(200).with_content_type("text/css").with_body(body)
    }

    /// An empty WOFF2 font response.
    #[must_use]
    pub fn font_woff2() -> Self {
        Self::new(200).with_content_type("font/woff2")
    }

    /// A generic empty 200.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(200)
    }

    /// Sets the content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// The body encoded for CDP `Fetch.fulfillRequest`.
    #[must_use]
    pub fn body_base64(&self) -> String {
        BASE64.encode(self.body.as_bytes())
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if !(100..=599).contains(&self.status) {
            return Err(format!("status {} is not a valid HTTP status", self.status));
        }
        if let Some(ct) = &self.content_type {
            if ct.trim().is_empty() {
                return Err("content type is empty".to_string());
            }
            if !ct.contains('/') {
                return Err(format!("content type '{ct}' is not a media type"));
            }
            if ct.contains(['\r', '\n']) {
                return Err("content type contains a line break".to_string());
            }
        }
        Ok(())
    }
}

/// A compiled pattern plus the response it serves.
#[derive(Debug, Clone)]
pub struct InterceptRule {
    pattern: UrlPattern,
    matcher: Regex,
    mock: MockResponse,
}

impl InterceptRule {
    /// The pattern as registered.
    #[must_use]
    pub fn pattern(&self) -> &UrlPattern {
        &self.pattern
    }

    /// The response served for matching requests.
    #[must_use]
    pub fn mock(&self) -> &MockResponse {
        &self.mock
    }

    /// True if this rule matches `url`.
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        self.matcher.is_match(url)
    }
}

/// What to do with one outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Serve the mock instead of touching the network
    Fulfill(MockResponse),
    /// Let the request through unmodified
    PassThrough,
}

/// Ordered, first-match-wins rule list for one session.
#[derive(Debug, Clone, Default)]
pub struct Interceptor {
    rules: Vec<InterceptRule>,
}

impl Interceptor {
    /// Creates an interceptor with no rules; everything passes through.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule after the existing ones.
    ///
    /// # Errors
    ///
    /// Returns `InterceptMismatch` if the pattern does not compile, the mock
    /// is malformed, or the same pattern is already registered with a
    /// different mock.
    pub fn register_rule(
        &mut self,
        pattern: impl Into<UrlPattern>,
        mock: MockResponse,
    ) -> Result<&mut Self> {
        let pattern = pattern.into();
        let reject = |reason: String| ProbeError::InterceptMismatch {
            pattern: pattern.to_string(),
            reason,
        };

        mock.validate().map_err(reject)?;
        let matcher = pattern.compile().map_err(reject)?;

        if let Some((index, existing)) = self
            .rules
            .iter()
            .enumerate()
            .find(|(_, r)| r.pattern == pattern)
        {
            if existing.mock != mock {
                return Err(reject(format!(
                    "conflicts with rule #{index} registered for the same pattern"
                )));
            }
            return Ok(self);
        }

        debug!(pattern = %pattern, status = mock.status, "registered intercept rule");
        self.rules.push(InterceptRule {
            pattern,
            matcher,
            mock,
        });
        Ok(self)
    }

    /// Builder form of [`register_rule`](Self::register_rule).
    ///
    /// # Errors
    ///
    /// Same as `register_rule`.
    pub fn with_rule(mut self, pattern: impl Into<UrlPattern>, mock: MockResponse) -> Result<Self> {
        self.register_rule(pattern, mock)?;
        Ok(self)
    }

    /// Rules used by the admin SPA suites: third-party fonts, stylesheets and
    /// CDN assets are answered locally so a slow or blocked CDN cannot stall
    /// page load.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the rules are static.
    pub fn external_assets() -> Result<Self> {
        Self::new()
            .with_rule(
                UrlPattern::regex(r"^https?://(fonts\.googleapis|cdnjs\.cloudflare)[^/]*/"),
                MockResponse::css("/* Mocked CSS */"),
            )?
            .with_rule(
                UrlPattern::regex(r"^https?://fonts\.gstatic[^/]*/"),
                MockResponse::font_woff2(),
            )?
            .with_rule(
                "**/*{googleapis,gstatic,cdnjs,jsdelivr,cloudflare}*/**",
                MockResponse::empty(),
            )
    }

    /// Returns the first rule matching `url`.
    #[must_use]
    pub fn resolve(&self, url: &str) -> Option<&InterceptRule> {
        self.rules.iter().find(|rule| rule.matches(url))
    }

    /// Decides how to handle a request for `url`.
    #[must_use]
    pub fn decide(&self, url: &str) -> Decision {
        match self.resolve(url) {
            Some(rule) => Decision::Fulfill(rule.mock.clone()),
            None => Decision::PassThrough,
        }
    }

    /// Registered rules in evaluation order.
    #[must_use]
    pub fn rules(&self) -> &[InterceptRule] {
        &self.rules
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True when no rules are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Activates interception on one page. The rule set is frozen from here on.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver cannot enable interception.
    pub async fn install(self, driver: &dyn PageDriver, sink: EventSink) -> Result<Arc<Self>> {
        let rules = Arc::new(self);
        if !rules.is_empty() {
            driver.enable_interception(rules.clone(), sink).await?;
        }
        Ok(rules)
    }
}
