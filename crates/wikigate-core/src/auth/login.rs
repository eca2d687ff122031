use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::credentials::InstanceCredentialConfig;
use super::session::{CachedSession, FALLBACK_COOKIE_NAME, PRIMARY_COOKIE_NAME};
use crate::browser::{BrowserCookie, BrowserLauncher, BrowserSession, LaunchOptions};
use crate::error::{Error, Result};

/// Login page, relative to the instance base URL
const LOGIN_PATH: &str = "/login.action";

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(15);
const IDLE_TIMEOUT: Duration = Duration::from_secs(15);

/// Time allowed for each selector candidate before moving to the next one
const CANDIDATE_TIMEOUT: Duration = Duration::from_secs(2);

/// Cookie names in order of preference
const SESSION_COOKIE_NAMES: [&str; 2] = [PRIMARY_COOKIE_NAME, FALLBACK_COOKIE_NAME];

/// Login form markup differs between server versions; each step lists the
/// selectors seen in the wild, newest first.
const USERNAME_SELECTORS: &[&str] = &[
    "#username-field",
    "input[name=\"username\"]",
    "#os_username",
    "input[name=\"os_username\"]",
];

const PASSWORD_SELECTORS: &[&str] = &[
    "#password-field",
    "input[name=\"password\"]",
    "#os_password",
    "input[name=\"os_password\"]",
];

const SUBMIT_SELECTORS: &[&str] = &[
    "button[type=\"submit\"]",
    "input[type=\"submit\"]",
    "button#login",
    "#loginButton",
];

#[derive(Debug, Clone, Copy)]
enum StepAction {
    FillUsername,
    FillPassword,
    Click,
}

struct FormStep {
    action: StepAction,
    candidates: &'static [&'static str],
    not_found: &'static str,
}

const FORM_STEPS: [FormStep; 3] = [
    FormStep {
        action: StepAction::FillUsername,
        candidates: USERNAME_SELECTORS,
        not_found: "username field not found",
    },
    FormStep {
        action: StepAction::FillPassword,
        candidates: PASSWORD_SELECTORS,
        not_found: "password field not found",
    },
    FormStep {
        action: StepAction::Click,
        candidates: SUBMIT_SELECTORS,
        not_found: "submit button not found",
    },
];

/// Obtains a fresh session cookie by submitting the HTML login form in a
/// headless browser.
///
/// The driver never touches the session cache; callers persist the
/// returned session.
#[derive(Clone)]
pub struct BrowserLoginDriver {
    launcher: Arc<dyn BrowserLauncher>,
}

impl BrowserLoginDriver {
    pub fn new(launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self { launcher }
    }

    pub async fn login(&self, instance: &InstanceCredentialConfig) -> Result<CachedSession> {
        let (Some(username), Some(password)) = (&instance.username, &instance.password) else {
            return Err(Error::Configuration(format!(
                "browser login for {} needs a username and password",
                instance.name
            )));
        };

        info!(
            instance = %instance.name,
            url = %instance.base_url,
            "Authenticating via browser login"
        );

        let page = self
            .launcher
            .launch(LaunchOptions {
                http_credentials: instance.proxy.clone(),
            })
            .await
            .map_err(|e| Error::Login(e.to_string()))?;
        let mut browser = OpenBrowser {
            page: Some(page),
            instance: instance.name.clone(),
        };

        let outcome = match browser.page.as_deref_mut() {
            Some(page) => Self::submit_login(page, instance, username, password).await,
            None => Err(Error::Login("browser closed before login".to_string())),
        };
        browser.close().await;

        let session = outcome?;
        info!(
            instance = %instance.name,
            cookie = %session.cookie_name,
            "Authenticated successfully"
        );
        Ok(session)
    }

    async fn submit_login(
        page: &mut dyn BrowserSession,
        instance: &InstanceCredentialConfig,
        username: &str,
        password: &str,
    ) -> Result<CachedSession> {
        let login_url = format!("{}{}", instance.base_url, LOGIN_PATH);
        page.navigate(&login_url, NAVIGATION_TIMEOUT)
            .await
            .map_err(|e| Error::Login(format!("could not open login page: {}", e)))?;

        for step in &FORM_STEPS {
            let value = match step.action {
                StepAction::FillUsername => Some(username),
                StepAction::FillPassword => Some(password),
                StepAction::Click => None,
            };
            let matched = try_candidates(page, step.candidates, value).await;
            if matched.is_none() {
                return Err(Error::Login(step.not_found.to_string()));
            }
        }

        page.wait_for_idle(IDLE_TIMEOUT)
            .await
            .map_err(|e| Error::Login(format!("login did not complete: {}", e)))?;

        let cookies = page
            .cookies()
            .await
            .map_err(|e| Error::Login(format!("could not read cookies: {}", e)))?;

        select_session_cookie(&cookies)
            .map(|cookie| CachedSession::new(&cookie.name, &cookie.value))
            .ok_or_else(|| Error::Login("no session cookie".to_string()))
    }
}

/// An open browser that is closed exactly once.
///
/// If the login future is dropped or panics before `close` is awaited, the
/// close runs on a spawned task instead.
struct OpenBrowser {
    page: Option<Box<dyn BrowserSession>>,
    instance: String,
}

impl OpenBrowser {
    async fn close(&mut self) {
        if let Some(page) = self.page.as_mut() {
            if let Err(e) = page.close().await {
                warn!(instance = %self.instance, error = %e, "Failed to close browser");
            }
        }
        self.page = None;
    }
}

impl Drop for OpenBrowser {
    fn drop(&mut self) {
        let Some(mut page) = self.page.take() else {
            return;
        };
        let instance = std::mem::take(&mut self.instance);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(instance = %instance, "Closing abandoned browser");
                handle.spawn(async move {
                    if let Err(e) = page.close().await {
                        warn!(instance = %instance, error = %e, "Failed to close browser");
                    }
                });
            }
            Err(_) => warn!(instance = %instance, "No runtime left to close browser"),
        }
    }
}

/// Try each selector in order, filling `value` (or clicking when `None`).
/// Returns the first selector that worked.
async fn try_candidates(
    page: &mut dyn BrowserSession,
    candidates: &[&'static str],
    value: Option<&str>,
) -> Option<&'static str> {
    for &selector in candidates {
        let result = match value {
            Some(value) => page.fill_field(selector, value, CANDIDATE_TIMEOUT).await,
            None => page.click(selector, CANDIDATE_TIMEOUT).await,
        };
        match result {
            Ok(()) => return Some(selector),
            Err(e) => debug!(selector, error = %e, "Selector candidate failed"),
        }
    }
    None
}

fn select_session_cookie(cookies: &[BrowserCookie]) -> Option<&BrowserCookie> {
    SESSION_COOKIE_NAMES
        .iter()
        .find_map(|name| cookies.iter().find(|c| c.name == *name))
}
