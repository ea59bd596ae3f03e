//! Chrome process management.
//!
//! `TestBrowser` launches one Chrome process and hands out isolated tabs.
//! Every [`Session`](crate::session::Session) gets its own tab; sessions
//! share the process but never a page, interceptor or event log.
//!
//! # Resource Safety
//!
//! `TestBrowser` implements Drop so the Chrome process is killed even if a
//! test panics. Prefer `close()` for a graceful shutdown.

use crate::driver::PageDriver;
use crate::error::{ProbeError, Result};
use crate::intercept::Interceptor;
use crate::page::ChromePage;
use crate::session::{Session, SessionOptions};
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use spa_probe_config::HarnessConfig;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Configuration for launching the browser.
#[derive(Debug, Clone)]
pub struct TestBrowserConfig {
    /// Run without a visible window (default: true).
    pub headless: bool,

    /// Browser window size (default: 1280x720).
    pub window_size: (u32, u32),

    /// Additional Chrome arguments.
    pub args: Vec<String>,

    /// Chrome executable path (None = auto-detect).
    pub chrome_path: Option<String>,
}

impl TestBrowserConfig {
    /// Creates a new config with headless defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives launch settings from the harness configuration.
    #[must_use]
    pub fn from_harness(config: &HarnessConfig) -> Self {
        Self {
            headless: config.headless,
            window_size: (config.viewport.width, config.viewport.height),
            ..Self::default()
        }
    }

    /// Shows the browser window.
    #[must_use]
    pub fn visible(mut self) -> Self {
        self.headless = false;
        self
    }

    /// Sets a custom window size.
    #[must_use]
    pub fn with_window_size(mut self, width: u32, height: u32) -> Self {
        self.window_size = (width, height);
        self
    }

    /// Adds additional Chrome arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Uses a specific Chrome binary.
    #[must_use]
    pub fn with_chrome_path(mut self, path: impl Into<String>) -> Self {
        self.chrome_path = Some(path.into());
        self
    }

    fn to_browser_config(&self) -> Result<BrowserConfig> {
        let mut config = BrowserConfig::builder();

        // chromiumoxide launches headless unless asked otherwise
        if !self.headless {
            config = config.with_head();
        }

        config = config.window_size(self.window_size.0, self.window_size.1);

        // A fresh profile per process keeps parallel launches off the same
        // ProcessSingleton lock.
        let user_data_dir = std::env::temp_dir().join(format!("spa-probe-{}", uuid::Uuid::new_v4()));
        config = config.user_data_dir(user_data_dir);

        for arg in &self.args {
            config = config.arg(arg.clone());
        }

        if let Some(path) = &self.chrome_path {
            config = config.chrome_executable(path.clone());
        }

        config.build().map_err(|e| ProbeError::LaunchFailed {
            reason: format!("invalid browser configuration: {e}"),
            source: None,
        })
    }
}

impl Default for TestBrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_size: (1280, 720),
            args: vec![
                // Containers rarely grant the user namespaces the sandbox needs.
                // Only ever point this at the application under test.
                "--no-sandbox".to_string(),
                "--disable-setuid-sandbox".to_string(),
                // /dev/shm is tiny in Docker
                "--disable-dev-shm-usage".to_string(),
                "--disable-gpu".to_string(),
            ],
            chrome_path: None,
        }
    }
}

/// A managed Chrome process.
///
/// ```ignore
/// let browser = TestBrowser::launch(TestBrowserConfig::default()).await?;
/// let session = browser
///     .open_session(SessionOptions::new("login page"), Interceptor::external_assets()?)
///     .await?;
/// // ...
/// session.close().await;
/// browser.close().await?;
/// ```
pub struct TestBrowser {
    inner: Arc<Mutex<Option<Browser>>>,
}

impl TestBrowser {
    /// Launches Chrome and connects to it over CDP.
    ///
    /// # Errors
    ///
    /// Returns `LaunchFailed` if Chrome is missing or fails to start.
    pub async fn launch(config: TestBrowserConfig) -> Result<Self> {
        debug!(?config, "launching browser");

        let browser_config = config.to_browser_config()?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ProbeError::LaunchFailed {
                reason: "failed to launch Chrome process".to_string(),
                source: Some(Box::new(e)),
            })?;

        // chromiumoxide only processes CDP messages while the handler is polled
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!(error = %e, "browser handler error");
                }
            }
        });

        debug!("browser launched");

        Ok(Self {
            inner: Arc::new(Mutex::new(Some(browser))),
        })
    }

    /// Launches Chrome with settings taken from the harness configuration.
    ///
    /// # Errors
    ///
    /// Same as [`TestBrowser::launch`].
    pub async fn from_config(config: &HarnessConfig) -> Result<Self> {
        Self::launch(TestBrowserConfig::from_harness(config)).await
    }

    /// Opens a new blank tab.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed` if the browser has been closed.
    pub async fn new_page(&self) -> Result<ChromePage> {
        let browser = self.inner.lock().await;
        let browser = browser.as_ref().ok_or(ProbeError::AlreadyClosed)?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ProbeError::ConnectionFailed(e.to_string()))?;

        Ok(ChromePage::new(page))
    }

    /// Opens a tab and starts a session on it.
    ///
    /// # Errors
    ///
    /// Propagates tab creation failures and [`Session::open`] errors.
    pub async fn open_session(&self, options: SessionOptions, interceptor: Interceptor) -> Result<Session> {
        let page: Arc<dyn PageDriver> = Arc::new(self.new_page().await?);
        Session::open(page, options, interceptor).await
    }

    /// Closes the browser and waits for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the browser fails to close gracefully.
    pub async fn close(self) -> Result<()> {
        let mut guard = self.inner.lock().await;

        if let Some(mut browser) = guard.take() {
            debug!("closing browser");
            browser
                .close()
                .await
                .map_err(|e| ProbeError::ConnectionFailed(e.to_string()))?;
            if let Err(e) = browser.wait().await {
                debug!(error = %e, "browser process did not report exit status");
            }
        }

        Ok(())
    }

    /// Returns true if the browser has been closed.
    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.is_none()
    }
}

impl Drop for TestBrowser {
    fn drop(&mut self) {
        // chromiumoxide's Browser kills the process on drop if close() never ran
        if let Ok(guard) = self.inner.try_lock() {
            if guard.is_some() {
                warn!("TestBrowser dropped without close(); killing Chrome");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_container_friendly() {
        let config = TestBrowserConfig::default();
        assert!(config.headless);
        assert_eq!(config.window_size, (1280, 720));
        assert!(config.args.iter().any(|a| a == "--no-sandbox"));
        assert!(config.args.iter().any(|a| a == "--disable-dev-shm-usage"));
    }

    #[test]
    fn harness_config_drives_window_and_headless() {
        let mut harness = HarnessConfig::default();
        harness.headless = false;
        harness.viewport.width = 1600;
        harness.viewport.height = 900;

        let config = TestBrowserConfig::from_harness(&harness);
        assert!(!config.headless);
        assert_eq!(config.window_size, (1600, 900));
    }

    #[test]
    fn builder_methods() {
        let config = TestBrowserConfig::new()
            .visible()
            .with_window_size(800, 600)
            .with_args(["--lang=en-US"])
            .with_chrome_path("/usr/bin/chromium");
        assert!(!config.headless);
        assert_eq!(config.window_size, (800, 600));
        assert_eq!(config.args.last().map(String::as_str), Some("--lang=en-US"));
        assert_eq!(config.chrome_path.as_deref(), Some("/usr/bin/chromium"));
    }

    #[tokio::test]
    #[ignore] // Requires Chrome to be installed
    async fn browser_launch_and_close() {
        let browser = TestBrowser::launch(TestBrowserConfig::default())
            .await
            .expect("failed to launch browser");

        assert!(!browser.is_closed().await);

        browser.close().await.expect("failed to close browser");
    }
}
