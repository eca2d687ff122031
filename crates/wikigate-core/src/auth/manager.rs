use tracing::{debug, warn};

use super::credentials::InstanceCredentialConfig;
use super::login::BrowserLoginDriver;
use super::session::{CachedSession, SessionCache};
use super::validator::SessionValidator;
use crate::error::Result;

/// Hands out usable sessions for cookie-authenticated instances.
///
/// Reuse order: cached and fresh and accepted by the probe, otherwise a new
/// browser login whose result is persisted before it is returned.
#[derive(Clone)]
pub struct SessionManager {
    cache: SessionCache,
    validator: SessionValidator,
    driver: BrowserLoginDriver,
}

impl SessionManager {
    pub fn new(
        cache: SessionCache,
        validator: SessionValidator,
        driver: BrowserLoginDriver,
    ) -> Self {
        Self {
            cache,
            validator,
            driver,
        }
    }

    /// A session that is fresh and was accepted by the server just now,
    /// logging in if necessary.
    pub async fn acquire(&self, instance: &InstanceCredentialConfig) -> Result<CachedSession> {
        match self.cache.load(&instance.name) {
            Some(session) if !session.is_fresh() => {
                debug!(
                    instance = %instance.name,
                    created_at = %session.created_at,
                    "Cached session expired"
                );
            }
            Some(session) => {
                if self.validator.validate(instance, &session).await {
                    return Ok(session);
                }
            }
            None => debug!(instance = %instance.name, "No cached session"),
        }
        self.login(instance).await
    }

    /// Log in and persist the new session. A failed login leaves the cache
    /// as it was.
    pub async fn login(&self, instance: &InstanceCredentialConfig) -> Result<CachedSession> {
        let session = self.driver.login(instance).await?;
        self.cache.store(&instance.name, &session)?;
        Ok(session)
    }

    /// Drop the cached session and log in again.
    pub async fn reauthenticate(
        &self,
        instance: &InstanceCredentialConfig,
    ) -> Result<CachedSession> {
        warn!(
            instance = %instance.name,
            "Session rejected, clearing cache and logging in again"
        );
        self.cache.invalidate(&instance.name)?;
        self.login(instance).await
    }
}
