use std::fmt;

use base64::Engine;

use crate::error::{Error, Result};

/// Environment variable prefix for every instance setting
const ENV_PREFIX: &str = "CONFLUENCE";

/// HTTP Basic credentials, either for the service itself or for the
/// reverse proxy in front of it.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl BasicCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// `Basic <base64(user:pass)>` header value
    pub fn header_value(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(raw))
    }
}

impl fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How requests against an instance are authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStrategy {
    /// `Authorization: Basic user:pat`
    DirectToken,
    /// `Authorization: Basic user:password`
    DirectPassword,
    /// Proxy basic auth plus a session cookie obtained by a browser login
    CookieViaProxyLogin,
}

impl AuthStrategy {
    /// Pick a strategy from which credentials are present.
    ///
    /// Priority is fixed: proxy pair, then token, then password.
    pub fn select(has_proxy_pair: bool, has_token: bool, has_password: bool) -> Option<Self> {
        if has_proxy_pair {
            Some(AuthStrategy::CookieViaProxyLogin)
        } else if has_token {
            Some(AuthStrategy::DirectToken)
        } else if has_password {
            Some(AuthStrategy::DirectPassword)
        } else {
            None
        }
    }

    pub fn uses_session(&self) -> bool {
        matches!(self, AuthStrategy::CookieViaProxyLogin)
    }

    pub fn description(&self) -> &'static str {
        match self {
            AuthStrategy::CookieViaProxyLogin => "nginx-protected (browser authentication)",
            AuthStrategy::DirectToken => "PAT (direct API authentication)",
            AuthStrategy::DirectPassword => "password (basic authentication)",
        }
    }
}

/// Credentials for one configured instance, resolved once per run.
#[derive(Clone)]
pub struct InstanceCredentialConfig {
    /// Instance identifier as configured (upper-cased)
    pub name: String,
    /// Base URL without a trailing slash
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub proxy: Option<BasicCredentials>,
}

impl fmt::Debug for InstanceCredentialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("InstanceCredentialConfig")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("token", &redact(&self.token))
            .field("proxy", &self.proxy)
            .finish()
    }
}

impl InstanceCredentialConfig {
    /// Read `CONFLUENCE_<INSTANCE>_*` variables from the process environment
    pub fn from_env(instance: &str) -> Result<(Self, AuthStrategy)> {
        Self::from_lookup(instance, |key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a caller-supplied lookup
    pub fn from_lookup(
        instance: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(Self, AuthStrategy)> {
        let name = instance.trim().to_uppercase();
        if name.is_empty() {
            return Err(Error::Configuration("instance name is empty".to_string()));
        }

        let read = |field: &str| {
            lookup(&env_var(&name, field))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let base_url = read("URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .ok_or_else(|| Error::Configuration(format!("{} not set", env_var(&name, "URL"))))?;

        let proxy = match (read("BASIC_USER"), read("BASIC_PASS")) {
            (Some(user), Some(pass)) => Some(BasicCredentials::new(user, pass)),
            _ => None,
        };

        let config = Self {
            base_url,
            username: read("USERNAME"),
            password: read("PASSWORD"),
            token: read("PAT"),
            proxy,
            name,
        };
        let strategy = config.resolve()?;
        Ok((config, strategy))
    }

    /// Select the auth strategy and check that it has what it needs.
    pub fn resolve(&self) -> Result<AuthStrategy> {
        let strategy = AuthStrategy::select(
            self.proxy.is_some(),
            self.token.is_some(),
            self.password.is_some(),
        )
        .ok_or_else(|| {
            Error::Configuration(format!(
                "no valid credentials for {}: set {} and {} or {} (optionally {} + {} for nginx-protected instances)",
                self.name,
                env_var(&self.name, "USERNAME"),
                env_var(&self.name, "PAT"),
                env_var(&self.name, "PASSWORD"),
                env_var(&self.name, "BASIC_USER"),
                env_var(&self.name, "BASIC_PASS"),
            ))
        })?;

        let mut missing = Vec::new();
        if self.username.is_none() {
            missing.push(env_var(&self.name, "USERNAME"));
        }
        if strategy == AuthStrategy::CookieViaProxyLogin && self.password.is_none() {
            missing.push(env_var(&self.name, "PASSWORD"));
        }
        if !missing.is_empty() {
            return Err(Error::Configuration(format!(
                "{} required for {} but not set",
                missing.join(", "),
                strategy.description()
            )));
        }

        Ok(strategy)
    }

    /// Credentials for `Authorization` on direct strategies
    pub fn direct_credentials(&self, strategy: AuthStrategy) -> Option<BasicCredentials> {
        let username = self.username.clone()?;
        let secret = match strategy {
            AuthStrategy::DirectToken => self.token.clone()?,
            AuthStrategy::DirectPassword => self.password.clone()?,
            AuthStrategy::CookieViaProxyLogin => return None,
        };
        Some(BasicCredentials::new(username, secret))
    }
}

/// `CONFLUENCE_<NAME>_<FIELD>`
pub fn env_var(name: &str, field: &str) -> String {
    format!("{}_{}_{}", ENV_PREFIX, name, field)
}
