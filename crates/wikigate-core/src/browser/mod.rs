//! Headless browser capability used for form logins.
//!
//! The login driver only ever talks to these traits: it navigates, fills a
//! field, clicks, waits for the page to settle and reads cookies. Selector
//! fallback lives in the driver, so every call here targets exactly one
//! selector.
//!
//! [`webdriver`] provides the implementation used in production, speaking
//! the W3C WebDriver protocol to chromedriver or a Selenium grid.

pub mod webdriver;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::auth::BasicCredentials;

pub use webdriver::WebDriverLauncher;

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Failed to start browser: {0}")]
    Launch(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Timed out after {timeout:?} waiting for {what}")]
    Timeout { what: String, timeout: Duration },

    #[error("Browser protocol error: {0}")]
    Protocol(String),

    #[error("Browser connection error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Credentials answered to HTTP basic-auth challenges (the reverse proxy)
    pub http_credentials: Option<BasicCredentials>,
}

/// Starts isolated browser contexts.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: LaunchOptions) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

/// One open browser context with a single page.
///
/// Callers must call [`close`](BrowserSession::close) when done, whatever
/// the outcome of the other calls.
#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), BrowserError>;

    async fn fill_field(
        &mut self,
        selector: &str,
        value: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError>;

    async fn click(&mut self, selector: &str, timeout: Duration) -> Result<(), BrowserError>;

    /// Wait until the page reached by the last action has finished loading.
    async fn wait_for_idle(&mut self, timeout: Duration) -> Result<(), BrowserError>;

    async fn cookies(&mut self) -> Result<Vec<BrowserCookie>, BrowserError>;

    async fn close(&mut self) -> Result<(), BrowserError>;
}
