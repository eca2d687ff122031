//! API client for the wiki REST API.
//!
//! `ApiClient` hides which auth strategy an instance uses: callers issue
//! `get`/`post`/`put`/`delete` and get parsed JSON back.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::debug;

use super::request::{AuthMaterials, AuthenticatedRequest};
use crate::auth::{
    AuthStrategy, BrowserLoginDriver, CachedSession, InstanceCredentialConfig, SessionCache,
    SessionManager, SessionValidator,
};
use crate::browser::WebDriverLauncher;
use crate::config::Config;
use crate::error::{Error, Result};

/// REST API root, relative to the instance base URL
const API_PREFIX: &str = "/rest/api";

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// A request is tried at most twice: once, and once more after a fresh
/// login if the cookie session was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    AfterReauthentication,
}

/// API client for one instance.
/// Clone is cheap and clones share the current session.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    instance: InstanceCredentialConfig,
    strategy: AuthStrategy,
    sessions: SessionManager,
    session: Arc<Mutex<Option<CachedSession>>>,
}

impl ApiClient {
    pub fn new(
        instance: InstanceCredentialConfig,
        strategy: AuthStrategy,
        sessions: SessionManager,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            instance,
            strategy,
            sessions,
            session: Arc::new(Mutex::new(None)),
        })
    }

    /// Build a client for a named instance from `CONFLUENCE_<NAME>_*`
    /// variables. Credential problems are reported here, before any I/O.
    pub fn from_env(instance: &str, config: &Config) -> Result<Self> {
        let (instance, strategy) = InstanceCredentialConfig::from_env(instance)?;
        let launcher = WebDriverLauncher::new(&config.webdriver_url)?;
        let sessions = SessionManager::new(
            SessionCache::new(&config.cache_dir),
            SessionValidator::new()?,
            BrowserLoginDriver::new(Arc::new(launcher)),
        );
        Self::new(instance, strategy, sessions)
    }

    pub fn instance(&self) -> &InstanceCredentialConfig {
        &self.instance
    }

    pub fn strategy(&self) -> AuthStrategy {
        self.strategy
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        format!(
            "{}{}/{}",
            self.instance.base_url,
            API_PREFIX,
            endpoint.trim_start_matches('/')
        )
    }

    /// Force a fresh browser login, replacing any cached session.
    pub async fn login(&self) -> Result<CachedSession> {
        if !self.strategy.uses_session() {
            return Err(Error::Configuration(format!(
                "{} uses {}; no session login needed",
                self.instance.name,
                self.strategy.description()
            )));
        }
        let mut current = self.session.lock().await;
        let session = self.sessions.login(&self.instance).await?;
        *current = Some(session.clone());
        Ok(session)
    }

    async fn auth_materials(&self, attempt: Attempt) -> Result<AuthMaterials> {
        match self.strategy {
            AuthStrategy::DirectToken | AuthStrategy::DirectPassword => {
                let creds = self
                    .instance
                    .direct_credentials(self.strategy)
                    .ok_or_else(|| {
                        Error::Configuration(format!(
                            "incomplete credentials for {}",
                            self.instance.name
                        ))
                    })?;
                Ok(AuthMaterials {
                    authorization: Some(creds.header_value()),
                    cookie: None,
                })
            }
            AuthStrategy::CookieViaProxyLogin => {
                let session = match attempt {
                    Attempt::First => self.current_session().await?,
                    Attempt::AfterReauthentication => self.renew_session().await?,
                };
                Ok(AuthMaterials {
                    authorization: self.instance.proxy.as_ref().map(|p| p.header_value()),
                    cookie: Some(session.cookie_header()),
                })
            }
        }
    }

    /// Session in use by this client, acquired on first need
    async fn current_session(&self) -> Result<CachedSession> {
        let mut current = self.session.lock().await;
        if let Some(ref session) = *current {
            if session.is_fresh() {
                return Ok(session.clone());
            }
        }
        let session = self.sessions.acquire(&self.instance).await?;
        *current = Some(session.clone());
        Ok(session)
    }

    async fn renew_session(&self) -> Result<CachedSession> {
        let mut current = self.session.lock().await;
        *current = None;
        let session = self.sessions.reauthenticate(&self.instance).await?;
        *current = Some(session.clone());
        Ok(session)
    }

    /// Issue an API call against `<base>/rest/api/<endpoint>`.
    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        params: Option<&[(&str, &str)]>,
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = self.endpoint_url(endpoint);
        let query: Vec<(String, String)> = params
            .unwrap_or_default()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let mut attempt = Attempt::First;
        loop {
            let request = AuthenticatedRequest {
                method: method.clone(),
                url: url.clone(),
                query: query.clone(),
                body: body.cloned(),
                auth: self.auth_materials(attempt).await?,
            };

            debug!(method = %method, url = %url, ?attempt, "Sending request");
            let response = request.builder(&self.client).send().await?;

            if response.status() == StatusCode::UNAUTHORIZED
                && attempt == Attempt::First
                && self.strategy.uses_session()
            {
                attempt = Attempt::AfterReauthentication;
                continue;
            }

            return Self::parse_response(response).await;
        }
    }

    /// Decode a response: JSON on success, `{}` for an empty body, and an
    /// `Api` error carrying the server's message otherwise.
    async fn parse_response(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(Error::from_status(status, &text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        serde_json::from_str(&text)
            .map_err(|e| Error::InvalidResponse(format!("{} (status {})", e, status)))
    }

    pub async fn get(&self, endpoint: &str, params: Option<&[(&str, &str)]>) -> Result<Value> {
        self.request(Method::GET, endpoint, params, None).await
    }

    pub async fn post(&self, endpoint: &str, body: &Value) -> Result<Value> {
        self.request(Method::POST, endpoint, None, Some(body)).await
    }

    pub async fn put(&self, endpoint: &str, body: &Value) -> Result<Value> {
        self.request(Method::PUT, endpoint, None, Some(body)).await
    }

    pub async fn delete(&self, endpoint: &str) -> Result<Value> {
        self.request(Method::DELETE, endpoint, None, None).await
    }

    /// The account the current credentials belong to
    pub async fn current_user(&self) -> Result<Value> {
        self.get("user/current", None).await
    }
}
