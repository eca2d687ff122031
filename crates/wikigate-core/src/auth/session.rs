use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Cookie set by Confluence's seraph authenticator
pub const PRIMARY_COOKIE_NAME: &str = "seraph.confluence";

/// Servlet container session id, used when seraph is absent
pub const FALLBACK_COOKIE_NAME: &str = "JSESSIONID";

/// Sessions are trusted for 7 days before a fresh login is forced.
/// The legacy login endpoints send no usable expiry, so this is policy.
const SESSION_TTL_DAYS: i64 = 7;

pub fn session_ttl() -> Duration {
    Duration::days(SESSION_TTL_DAYS)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedSession {
    #[serde(rename = "cookieName", alias = "cookie_name", default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(rename = "cookieValue", alias = "cookie_value")]
    pub cookie_value: String,
    #[serde(rename = "createdAt", alias = "created_at", with = "epoch_seconds")]
    pub created_at: DateTime<Utc>,
}

fn default_cookie_name() -> String {
    PRIMARY_COOKIE_NAME.to_string()
}

impl CachedSession {
    /// New session created now, at millisecond precision so it survives
    /// the on-disk round trip unchanged.
    pub fn new(cookie_name: impl Into<String>, cookie_value: impl Into<String>) -> Self {
        let now = Utc::now();
        let created_at = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
        Self {
            cookie_name: cookie_name.into(),
            cookie_value: cookie_value.into(),
            created_at,
        }
    }

    /// Fresh while strictly younger than the TTL; a session exactly TTL old is stale.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at < session_ttl()
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + session_ttl()
    }

    pub fn time_until_expiry(&self) -> Duration {
        self.expires_at() - Utc::now()
    }

    /// `Cookie` header value
    pub fn cookie_header(&self) -> String {
        format!("{}={}", self.cookie_name, self.cookie_value)
    }

    pub fn age_display(&self) -> String {
        let minutes = (Utc::now() - self.created_at).num_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            format!("{}h ago", minutes / 60)
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }
}

/// Stores one session file per instance.
///
/// The directory is shared between processes. Writes go through a temp file
/// and a rename so readers never see a half-written session; two processes
/// racing on a cache miss may both log in, and the last writer wins.
#[derive(Debug, Clone)]
pub struct SessionCache {
    dir: PathBuf,
}

impl SessionCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Location of an instance's session file
    pub fn path(&self, instance: &str) -> PathBuf {
        self.dir.join(format!("confluence_{}_session.json", instance.to_lowercase()))
    }

    /// Load a persisted session. Missing, unreadable or malformed files are
    /// all reported as `None`.
    pub fn load(&self, instance: &str) -> Option<CachedSession> {
        let path = self.path(instance);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No usable session cache");
                return None;
            }
        };

        match serde_json::from_str::<CachedSession>(&contents) {
            Ok(session) => Some(session),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Ignoring malformed session cache");
                None
            }
        }
    }

    /// Persist a session, replacing any previous one atomically.
    pub fn store(&self, instance: &str, session: &CachedSession) -> Result<()> {
        let path = self.path(instance);
        let cache_err = |source: std::io::Error| Error::Cache {
            path: path.clone(),
            source,
        };

        std::fs::create_dir_all(&self.dir).map_err(cache_err)?;
        let contents = serde_json::to_vec(session)
            .map_err(|e| cache_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

        let mut temp = tempfile::NamedTempFile::new_in(&self.dir).map_err(cache_err)?;
        temp.write_all(&contents).map_err(cache_err)?;
        temp.as_file().sync_all().map_err(cache_err)?;
        temp.persist(&path).map_err(|e| cache_err(e.error))?;

        debug!(path = %path.display(), cookie = %session.cookie_name, "Stored session");
        Ok(())
    }

    /// Delete a persisted session. Deleting a missing session is not an error.
    pub fn invalidate(&self, instance: &str) -> Result<()> {
        let path = self.path(instance);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "Invalidated session");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::Cache { path, source }),
        }
    }
}

/// `createdAt` as fractional epoch seconds
mod epoch_seconds {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.timestamp_millis() as f64 / 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let seconds = f64::deserialize(deserializer)?;
        if !seconds.is_finite() {
            return Err(de::Error::custom("timestamp is not finite"));
        }
        DateTime::from_timestamp_millis((seconds * 1000.0).round() as i64)
            .ok_or_else(|| de::Error::custom("timestamp out of range"))
    }
}
