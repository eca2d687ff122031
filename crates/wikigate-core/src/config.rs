//! Runtime configuration shared by every instance.
//!
//! Per-instance credentials live in [`crate::auth::InstanceCredentialConfig`];
//! this module only covers where the session cache lives, which WebDriver
//! endpoint drives the headless browser, and where instance discovery looks
//! for exported credentials.
//!
//! All values come from the environment and have sensible defaults, so a
//! bare `Config::from_env()` works on a developer machine with chromedriver
//! running on its default port.

use std::path::PathBuf;

/// Overrides the session cache directory (defaults to the system temp dir)
pub const CACHE_DIR_VAR: &str = "WIKIGATE_CACHE_DIR";

/// Overrides the WebDriver endpoint used for browser logins
pub const WEBDRIVER_URL_VAR: &str = "WIKIGATE_WEBDRIVER_URL";

/// Overrides the secrets file scanned by instance discovery
pub const SECRETS_FILE_VAR: &str = "WIKIGATE_SECRETS_FILE";

/// chromedriver listens here unless told otherwise
const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";

/// Secrets file name in the user's home directory
const SECRETS_FILE: &str = ".secrets";

#[derive(Debug, Clone)]
pub struct Config {
    pub cache_dir: PathBuf,
    pub webdriver_url: String,
    pub secrets_file: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let cache_dir = non_empty(CACHE_DIR_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);

        let webdriver_url = non_empty(WEBDRIVER_URL_VAR)
            .unwrap_or_else(|| DEFAULT_WEBDRIVER_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let secrets_file = non_empty(SECRETS_FILE_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_secrets_file);

        Self {
            cache_dir,
            webdriver_url,
            secrets_file,
        }
    }

    fn default_secrets_file() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(SECRETS_FILE)
    }
}
