use std::time::Duration;

use reqwest::{header, Client, StatusCode};
use tracing::debug;

use super::credentials::InstanceCredentialConfig;
use super::session::CachedSession;
use crate::error::Result;

/// Endpoint used to probe whether a session is still accepted
const PROBE_PATH: &str = "/rest/api/user/current";

/// The probe should be cheap compared to a browser login
const VALIDATION_TIMEOUT_SECS: u64 = 5;

/// Confirms a cached session against the live service.
#[derive(Clone)]
pub struct SessionValidator {
    client: Client,
}

impl SessionValidator {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(VALIDATION_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client })
    }

    /// True only if the probe answers 200. Any failure is logged and
    /// reported as an invalid session.
    pub async fn validate(
        &self,
        instance: &InstanceCredentialConfig,
        session: &CachedSession,
    ) -> bool {
        let url = format!("{}{}", instance.base_url, PROBE_PATH);

        let mut request = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/json")
            .header(header::COOKIE, session.cookie_header());
        // The proxy header goes along with the cookie whichever cookie was captured
        if let Some(ref proxy) = instance.proxy {
            request = request.header(header::AUTHORIZATION, proxy.header_value());
        }

        match request.send().await {
            Ok(response) if response.status() == StatusCode::OK => {
                debug!(instance = %instance.name, "Cached session is valid");
                true
            }
            Ok(response) => {
                debug!(
                    instance = %instance.name,
                    status = %response.status(),
                    "Cached session rejected"
                );
                false
            }
            Err(e) => {
                debug!(instance = %instance.name, error = %e, "Session probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::BasicCredentials;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn instance(base_url: &str) -> InstanceCredentialConfig {
        InstanceCredentialConfig {
            name: "PROD".to_string(),
            base_url: base_url.to_string(),
            username: Some("alice".to_string()),
            password: Some("secret".to_string()),
            token: None,
            proxy: Some(BasicCredentials::new("user", "pass")),
        }
    }

    #[tokio::test]
    async fn test_valid_session_sends_cookie_and_proxy_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/user/current"))
            .and(header("cookie", "seraph.confluence=abc"))
            .and(header("authorization", "Basic dXNlcjpwYXNz"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "type": "known", "username": "alice"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let validator = SessionValidator::new().unwrap();
        let session = CachedSession::new("seraph.confluence", "abc");
        assert!(validator.validate(&instance(&server.uri()), &session).await);
    }

    #[tokio::test]
    async fn test_rejected_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/user/current"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let validator = SessionValidator::new().unwrap();
        let session = CachedSession::new("JSESSIONID", "stale");
        assert!(!validator.validate(&instance(&server.uri()), &session).await);
    }

    #[tokio::test]
    async fn test_other_success_status_is_not_valid() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/user/current"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let validator = SessionValidator::new().unwrap();
        let session = CachedSession::new("seraph.confluence", "abc");
        assert!(!validator.validate(&instance(&server.uri()), &session).await);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_not_valid() {
        let validator = SessionValidator::new().unwrap();
        let session = CachedSession::new("seraph.confluence", "abc");
        // Port 9 (discard) is closed on test machines
        assert!(!validator.validate(&instance("http://127.0.0.1:9"), &session).await);
    }
}
