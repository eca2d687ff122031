use std::path::PathBuf;

use thiserror::Error;

use crate::browser::BrowserError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Login failed: {0}")]
    Login(String),

    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Session cache error at {}: {source}", path.display())]
    Cache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl Error {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    /// Pull a human-readable message out of a JSON error body.
    ///
    /// Confluence answers with `{"message": ...}`; Jira-style endpoints use
    /// `{"errorMessages": [...]}`.
    fn server_message(body: &str) -> Option<String> {
        let value: serde_json::Value = serde_json::from_str(body).ok()?;
        if let Some(message) = value.get("message").and_then(|m| m.as_str()) {
            return Some(message.to_string());
        }
        value
            .get("errorMessages")
            .and_then(|m| m.as_array())
            .and_then(|messages| messages.iter().find_map(|m| m.as_str()))
            .map(str::to_string)
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = Self::server_message(body).unwrap_or_else(|| Self::truncate_body(body));
        Error::Api {
            status: status.as_u16(),
            message,
        }
    }

    /// HTTP status for `Api` errors
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}
