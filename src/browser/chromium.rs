//! Headless Chromium implementation of [`DocumentAccessor`].
//!
//! Every accessor launches its own browser process with a throwaway
//! user-data-dir, so cookies and storage never leak between targets.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::page::Page;
use futures_util::StreamExt;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{AccessorFactory, BrowserError, CandidateElement, DocumentAccessor};
use crate::config::Config;
use crate::constants::BROWSER_USER_AGENT;

/// Interval between element polls while waiting for a selector.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Hides the most common automation fingerprint.
const HIDE_WEBDRIVER_SCRIPT: &str =
    "Object.defineProperty(navigator, 'webdriver', {get: () => undefined})";

/// Browser launch settings.
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    /// Path to Chrome/Chromium executable (None for auto-detection).
    pub chrome_path: Option<String>,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Timeout for individual protocol requests.
    pub request_timeout: Duration,
}

impl BrowserSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            chrome_path: config.chrome_path.clone(),
            headless: config.browser_headless,
            viewport_width: config.viewport_width,
            viewport_height: config.viewport_height,
            request_timeout: config.limits.load_timeout.max(Duration::from_secs(30)),
        }
    }
}

/// Launches one isolated Chromium instance per [`AccessorFactory::open`].
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    settings: BrowserSettings,
}

impl ChromiumLauncher {
    #[must_use]
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl AccessorFactory for ChromiumLauncher {
    type Accessor = ChromiumAccessor;

    async fn open(&self) -> Result<ChromiumAccessor, BrowserError> {
        ChromiumAccessor::launch(&self.settings).await
    }
}

/// A single Chromium page plus the browser process that owns it.
pub struct ChromiumAccessor {
    browser: Option<Browser>,
    page: Option<Page>,
    handler: JoinHandle<()>,
    // Removed from disk when the accessor is dropped.
    _profile_dir: TempDir,
}

impl ChromiumAccessor {
    /// Launch a fresh browser with an empty profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile directory cannot be created or the
    /// browser fails to start.
    pub async fn launch(settings: &BrowserSettings) -> Result<Self, BrowserError> {
        info!(headless = settings.headless, "Launching browser");

        let profile_dir = tempfile::Builder::new()
            .prefix("timeline-harvester-profile-")
            .tempdir()
            .map_err(|e| BrowserError::Launch(format!("failed to create profile dir: {e}")))?;

        let mut config_builder = BrowserConfig::builder()
            .window_size(settings.viewport_width, settings.viewport_height)
            .request_timeout(settings.request_timeout)
            .user_data_dir(profile_dir.path())
            .no_sandbox()
            .disable_default_args()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-extensions")
            .arg("--disable-sync")
            .arg("--lang=en-US,en;q=0.9")
            .arg(format!("--user-agent={BROWSER_USER_AGENT}"));

        if settings.headless {
            config_builder = config_builder.arg("--headless=new");
        } else {
            config_builder = config_builder.with_head();
        }

        if let Some(ref chrome_path) = settings.chrome_path {
            config_builder = config_builder.chrome_executable(chrome_path);
        }

        let browser_config = config_builder
            .build()
            .map_err(|e| BrowserError::Launch(format!("invalid browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        // Spawn handler in background
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {e}");
                }
            }
        });

        let page = browser.new_page("about:blank").await?;
        page.set_user_agent(BROWSER_USER_AGENT).await?;
        page.evaluate_on_new_document(AddScriptToEvaluateOnNewDocumentParams::new(
            HIDE_WEBDRIVER_SCRIPT,
        ))
        .await?;

        debug!("Browser ready");

        Ok(Self {
            browser: Some(browser),
            page: Some(page),
            handler,
            _profile_dir: profile_dir,
        })
    }

    fn page(&self) -> Result<&Page, BrowserError> {
        self.page
            .as_ref()
            .ok_or_else(|| BrowserError::Script("page already closed".to_string()))
    }
}

#[async_trait]
impl DocumentAccessor for ChromiumAccessor {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        debug!(url = %url, "Navigating");
        let page = self.page()?;
        page.goto(url)
            .await
            .map_err(|e| BrowserError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        page.wait_for_navigation()
            .await
            .map_err(|e| BrowserError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
        let page = self.page()?;
        let started = Instant::now();
        loop {
            if !page.find_elements(selector).await?.is_empty() {
                return Ok(());
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(BrowserError::Timeout {
                    selector: selector.to_string(),
                    waited: elapsed,
                });
            }
            tokio::time::sleep(POLL_INTERVAL.min(timeout - elapsed)).await;
        }
    }

    async fn query_all(&mut self, selector: &str) -> Result<Vec<CandidateElement>, BrowserError> {
        let page = self.page()?;
        let elements = page.find_elements(selector).await?;

        let mut candidates = Vec::with_capacity(elements.len());
        for element in elements {
            // Virtualized timelines detach nodes while we read them; skip those.
            match element.outer_html().await {
                Ok(Some(html)) => candidates.push(CandidateElement::new(html)),
                Ok(None) => debug!("Candidate element has no markup, skipping"),
                Err(e) => warn!(error = %e, "Failed to read candidate element, skipping"),
            }
        }
        Ok(candidates)
    }

    async fn scroll_to(&mut self, y: f64) -> Result<(), BrowserError> {
        let y = if y.is_finite() { y.max(0.0) } else { 0.0 };
        self.page()?
            .evaluate(format!("window.scrollTo(0, {y})"))
            .await?;
        Ok(())
    }

    async fn content_height(&mut self) -> Result<f64, BrowserError> {
        self.page()?
            .evaluate("document.body.scrollHeight")
            .await?
            .into_value::<f64>()
            .map_err(|e| BrowserError::Script(format!("scrollHeight was not a number: {e}")))
    }

    async fn activate_text(&mut self, text: &str) -> Result<bool, BrowserError> {
        let needle = serde_json::to_string(text)
            .map_err(|e| BrowserError::Script(format!("failed to encode control text: {e}")))?;
        let script = format!(
            r#"(() => {{
                const needle = {needle};
                const candidates = document.querySelectorAll("span, button, [role='button']");
                for (const el of candidates) {{
                    if (el.textContent && el.textContent.includes(needle)) {{
                        const target = el.closest("button, [role='button']") || el;
                        target.click();
                        return true;
                    }}
                }}
                return false;
            }})()"#
        );
        self.page()?
            .evaluate(script)
            .await?
            .into_value::<bool>()
            .map_err(|e| BrowserError::Script(format!("control lookup returned non-boolean: {e}")))
    }

    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), BrowserError> {
        let element = self.page()?.find_element(selector).await?;
        element.click().await?;
        element.type_str(value).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                warn!("Failed to close page: {e}");
            }
        }
        if let Some(mut browser) = self.browser.take() {
            browser.close().await?;
            if let Err(e) = browser.wait().await {
                warn!("Failed to reap browser process: {e}");
            }
            info!("Browser shutdown complete");
        }
        self.handler.abort();
        Ok(())
    }
}

impl Drop for ChromiumAccessor {
    fn drop(&mut self) {
        // Async close is not possible here; dropping `Browser` kills the
        // child process and the handler task must not outlive it.
        self.handler.abort();
    }
}
