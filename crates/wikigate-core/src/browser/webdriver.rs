//! W3C WebDriver backend for [`BrowserLauncher`].
//!
//! Each launch opens a new WebDriver session with a headless Chrome, which
//! gives every login a clean cookie jar. WebDriver cannot answer HTTP
//! basic-auth challenges directly, so proxy credentials are embedded in the
//! URL userinfo when navigating.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{BrowserCookie, BrowserError, BrowserLauncher, BrowserSession, LaunchOptions};
use crate::auth::BasicCredentials;

/// Key under which WebDriver returns element references
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Upper bound for commands that carry no timeout of their own
const COMMAND_TIMEOUT_SECS: u64 = 30;

/// Extra time granted to the HTTP call on top of the WebDriver-side timeout
const COMMAND_SLACK_SECS: u64 = 5;

/// How often `document.readyState` is polled while waiting for idle
const IDLE_POLL_INTERVAL_MS: u64 = 250;

#[derive(Clone)]
pub struct WebDriverLauncher {
    client: Client,
    endpoint: String,
}

impl WebDriverLauncher {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, BrowserError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(COMMAND_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    fn capabilities() -> Value {
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "pageLoadStrategy": "normal",
                    "goog:chromeOptions": {
                        "args": ["--headless=new", "--disable-gpu", "--no-sandbox"]
                    }
                }
            }
        })
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(
        &self,
        options: LaunchOptions,
    ) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let url = format!("{}/session", self.endpoint);
        let value = command(
            &self.client,
            Method::POST,
            &url,
            Some(Self::capabilities()),
            "new session",
            Duration::from_secs(COMMAND_TIMEOUT_SECS),
        )
        .await
        .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| BrowserError::Launch("WebDriver returned no sessionId".to_string()))?;

        debug!(session_id, "Started WebDriver session");
        Ok(Box::new(WebDriverSession {
            client: self.client.clone(),
            base: format!("{}/session/{}", self.endpoint, session_id),
            http_credentials: options.http_credentials,
            closed: false,
        }))
    }
}

/// An open WebDriver session.
///
/// Dropping it without calling `close` leaves the browser running until
/// the WebDriver server reaps it.
pub struct WebDriverSession {
    client: Client,
    base: String,
    http_credentials: Option<BasicCredentials>,
    closed: bool,
}

impl WebDriverSession {
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        what: &str,
        timeout: Duration,
    ) -> Result<Value, BrowserError> {
        let url = format!("{}{}", self.base, path);
        command(&self.client, method, &url, body, what, timeout).await
    }

    async fn set_timeouts(&self, timeouts: Value) -> Result<(), BrowserError> {
        self.call(
            Method::POST,
            "/timeouts",
            Some(timeouts),
            "timeouts",
            Duration::from_secs(COMMAND_TIMEOUT_SECS),
        )
        .await?;
        Ok(())
    }

    /// Find one element, letting the driver wait up to `timeout` for it.
    async fn find(&self, selector: &str, timeout: Duration) -> Result<String, BrowserError> {
        self.set_timeouts(json!({ "implicit": timeout.as_millis() as u64 }))
            .await?;
        let value = self
            .call(
                Method::POST,
                "/element",
                Some(json!({ "using": "css selector", "value": selector })),
                selector,
                timeout + Duration::from_secs(COMMAND_SLACK_SECS),
            )
            .await?;

        value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BrowserError::Protocol(format!("no element reference for {}", selector)))
    }

    fn with_credentials(&self, url: &str) -> Result<String, BrowserError> {
        let Some(ref creds) = self.http_credentials else {
            return Ok(url.to_string());
        };
        let mut parsed = url::Url::parse(url)
            .map_err(|e| BrowserError::Protocol(format!("invalid URL {}: {}", url, e)))?;
        parsed
            .set_username(&creds.username)
            .and_then(|_| parsed.set_password(Some(&creds.password)))
            .map_err(|_| BrowserError::Protocol(format!("cannot attach credentials to {}", url)))?;
        Ok(parsed.to_string())
    }
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        let target = self.with_credentials(url)?;
        self.set_timeouts(json!({ "pageLoad": timeout.as_millis() as u64 }))
            .await?;
        self.call(
            Method::POST,
            "/url",
            Some(json!({ "url": target })),
            url,
            timeout + Duration::from_secs(COMMAND_SLACK_SECS),
        )
        .await
        .map_err(|e| match e {
            BrowserError::Protocol(ref msg) if msg.starts_with("timeout") => BrowserError::Timeout {
                what: format!("page load of {}", url),
                timeout,
            },
            other => other,
        })?;
        Ok(())
    }

    async fn fill_field(
        &mut self,
        selector: &str,
        value: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let element = self.find(selector, timeout).await?;
        let command_timeout = Duration::from_secs(COMMAND_TIMEOUT_SECS);
        self.call(
            Method::POST,
            &format!("/element/{}/clear", element),
            None,
            selector,
            command_timeout,
        )
        .await?;
        self.call(
            Method::POST,
            &format!("/element/{}/value", element),
            Some(json!({ "text": value })),
            selector,
            command_timeout,
        )
        .await?;
        Ok(())
    }

    async fn click(&mut self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
        let element = self.find(selector, timeout).await?;
        self.call(
            Method::POST,
            &format!("/element/{}/click", element),
            None,
            selector,
            Duration::from_secs(COMMAND_TIMEOUT_SECS),
        )
        .await?;
        Ok(())
    }

    /// Polls `document.readyState` until it reads `complete`.
    ///
    /// WebDriver has no network-idle signal. This relies on the Element Click
    /// command not returning until a navigation it started has loaded (W3C
    /// WebDriver, "Element Click", with the default `normal` page load
    /// strategy), so by the time this runs the document is the post-submit
    /// page rather than the login form.
    async fn wait_for_idle(&mut self, timeout: Duration) -> Result<(), BrowserError> {
        let deadline = Instant::now() + timeout;
        let script = json!({ "script": "return document.readyState", "args": [] });
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let state = self
                .call(
                    Method::POST,
                    "/execute/sync",
                    Some(script.clone()),
                    "document.readyState",
                    remaining + Duration::from_secs(COMMAND_SLACK_SECS),
                )
                .await?;
            if state.as_str() == Some("complete") {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout {
                    what: "page to settle".to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(Duration::from_millis(IDLE_POLL_INTERVAL_MS).min(remaining)).await;
        }
    }

    async fn cookies(&mut self) -> Result<Vec<BrowserCookie>, BrowserError> {
        let value = self
            .call(
                Method::GET,
                "/cookie",
                None,
                "cookies",
                Duration::from_secs(COMMAND_TIMEOUT_SECS),
            )
            .await?;
        serde_json::from_value(value)
            .map_err(|e| BrowserError::Protocol(format!("malformed cookie list: {}", e)))
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.call(
            Method::DELETE,
            "",
            None,
            "close session",
            Duration::from_secs(COMMAND_TIMEOUT_SECS),
        )
        .await?;
        debug!(session = %self.base, "Closed WebDriver session");
        Ok(())
    }
}

/// Send one WebDriver command and unwrap its `value`.
async fn command(
    client: &Client,
    method: Method,
    url: &str,
    body: Option<Value>,
    what: &str,
    timeout: Duration,
) -> Result<Value, BrowserError> {
    let mut request = client.request(method.clone(), url).timeout(timeout);
    if method != Method::GET && method != Method::DELETE {
        request = request.json(&body.unwrap_or_else(|| json!({})));
    }

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            BrowserError::Timeout {
                what: what.to_string(),
                timeout,
            }
        } else {
            BrowserError::Transport(e)
        }
    })?;

    let status = response.status();
    let text = response.text().await?;
    let mut payload: Value = if text.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).map_err(|e| {
            BrowserError::Protocol(format!("{} returned non-JSON body ({}): {}", url, status, e))
        })?
    };
    let value = payload.get_mut("value").map(Value::take).unwrap_or(Value::Null);

    if let Some(error) = value.get("error").and_then(Value::as_str) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(match error {
            "no such element" => BrowserError::ElementNotFound(what.to_string()),
            _ => BrowserError::Protocol(format!("{}: {}", error, message)),
        });
    }
    if !status.is_success() {
        warn!(%status, url, "WebDriver command failed without error payload");
        return Err(BrowserError::Protocol(format!("{} returned {}", url, status)));
    }

    Ok(value)
}
