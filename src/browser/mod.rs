//! Live document access.
//!
//! The pagination loop only talks to a [`DocumentAccessor`]; the Chromium
//! adapter in [`chromium`] is the production implementation and tests drive
//! scripted fakes.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod auth;
pub mod chromium;

pub use auth::{authenticate, AuthOutcome};
pub use chromium::{ChromiumAccessor, ChromiumLauncher};

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("timed out after {waited:?} waiting for '{selector}'")]
    Timeout { selector: String, waited: Duration },
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
    #[error("script evaluation failed: {0}")]
    Script(String),
    #[error("browser protocol error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
}

impl BrowserError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Markup snapshot of one rendered element that may be a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateElement {
    pub outer_html: String,
}

impl CandidateElement {
    #[must_use]
    pub fn new(outer_html: impl Into<String>) -> Self {
        Self {
            outer_html: outer_html.into(),
        }
    }
}

/// A navigable, scrollable live page.
#[async_trait]
pub trait DocumentAccessor: Send {
    /// Load `url` in the page.
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;

    /// Wait until at least one element matches `selector`.
    ///
    /// Returns [`BrowserError::Timeout`] when nothing matched within `timeout`.
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<(), BrowserError>;

    /// Snapshot every element currently matching `selector`, in document order.
    async fn query_all(&mut self, selector: &str) -> Result<Vec<CandidateElement>, BrowserError>;

    /// Move the viewport to vertical offset `y`.
    async fn scroll_to(&mut self, y: f64) -> Result<(), BrowserError>;

    /// Current height of the scrollable content.
    async fn content_height(&mut self) -> Result<f64, BrowserError>;

    /// Click the first control whose visible text contains `text`.
    ///
    /// Returns `false` when no such control is rendered.
    async fn activate_text(&mut self, text: &str) -> Result<bool, BrowserError>;

    /// Type `value` into the first element matching `selector`.
    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), BrowserError>;

    /// Release the page and any browser process behind it.
    async fn close(&mut self) -> Result<(), BrowserError>;
}

/// Produces a fresh, isolated accessor for each target.
#[async_trait]
pub trait AccessorFactory: Send + Sync {
    type Accessor: DocumentAccessor;

    async fn open(&self) -> Result<Self::Accessor, BrowserError>;
}
