//! End-to-end request flows against a mock wiki server with a scripted
//! browser and a temporary session cache.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wikigate_core::auth::{BasicCredentials, BrowserLoginDriver, SessionManager, SessionValidator};
use wikigate_core::browser::{
    BrowserCookie, BrowserError, BrowserLauncher, BrowserSession, LaunchOptions,
};
use wikigate_core::{
    ApiClient, AuthStrategy, CachedSession, Error, InstanceCredentialConfig, SessionCache,
};

const CONTENT_PATH: &str = "/rest/api/content/123";
const PROBE_PATH: &str = "/rest/api/user/current";

// ============================================================================
// Scripted browser
// ============================================================================

#[derive(Default)]
struct BrowserState {
    launches: AtomicUsize,
    closes: AtomicUsize,
    /// When false, no login form field can be found
    form_present: bool,
}

struct FakeLauncher(Arc<BrowserState>);

struct FakePage {
    state: Arc<BrowserState>,
    login_number: usize,
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(
        &self,
        options: LaunchOptions,
    ) -> Result<Box<dyn BrowserSession>, BrowserError> {
        assert!(options.http_credentials.is_some(), "proxy credentials must reach the browser");
        let login_number = self.0.launches.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(FakePage {
            state: self.0.clone(),
            login_number,
        }))
    }
}

impl FakePage {
    fn element(&self, selector: &str) -> Result<(), BrowserError> {
        if self.state.form_present {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound(selector.to_string()))
        }
    }
}

#[async_trait]
impl BrowserSession for FakePage {
    async fn navigate(&mut self, _url: &str, _timeout: Duration) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn fill_field(
        &mut self,
        selector: &str,
        _value: &str,
        _timeout: Duration,
    ) -> Result<(), BrowserError> {
        self.element(selector)
    }

    async fn click(&mut self, selector: &str, _timeout: Duration) -> Result<(), BrowserError> {
        self.element(selector)
    }

    async fn wait_for_idle(&mut self, _timeout: Duration) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn cookies(&mut self) -> Result<Vec<BrowserCookie>, BrowserError> {
        Ok(vec![BrowserCookie {
            name: "seraph.confluence".to_string(),
            value: format!("fresh-{}", self.login_number),
        }])
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn proxy() -> BasicCredentials {
    BasicCredentials::new("proxy", "proxy-pass")
}

fn instance(
    server: &MockServer,
    proxy: Option<BasicCredentials>,
    token: Option<&str>,
) -> InstanceCredentialConfig {
    InstanceCredentialConfig {
        name: "PROD".to_string(),
        base_url: server.uri(),
        username: Some("alice".to_string()),
        password: Some("secret".to_string()),
        token: token.map(str::to_string),
        proxy,
    }
}

fn client_for(
    instance: InstanceCredentialConfig,
    cache_dir: &Path,
    browser: Arc<BrowserState>,
) -> ApiClient {
    let strategy = instance.resolve().unwrap();
    let sessions = SessionManager::new(
        SessionCache::new(cache_dir),
        SessionValidator::new().unwrap(),
        BrowserLoginDriver::new(Arc::new(FakeLauncher(browser))),
    );
    ApiClient::new(instance, strategy, sessions).unwrap()
}

fn working_browser() -> Arc<BrowserState> {
    Arc::new(BrowserState {
        form_present: true,
        ..Default::default()
    })
}

fn cookie(value: &str) -> String {
    format!("seraph.confluence={}", value)
}

async fn mount_probe(server: &MockServer, status: u16, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path(PROBE_PATH))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({"username": "alice"})))
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn page() -> serde_json::Value {
    json!({"id": "123", "type": "page", "title": "Runbook"})
}

// ============================================================================
// Direct strategies
// ============================================================================

#[tokio::test]
async fn direct_token_uses_basic_header_without_cache() {
    let server = MockServer::start().await;
    let cache_dir = tempfile::tempdir().unwrap();
    let browser = working_browser();

    Mock::given(method("GET"))
        .and(path(CONTENT_PATH))
        .and(query_param("expand", "body.storage,version"))
        .and(header(
            "authorization",
            BasicCredentials::new("alice", "token").header_value().as_str(),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(page()))
        .expect(1)
        .mount(&server)
        .await;
    mount_probe(&server, 200, 0).await;

    let client = client_for(
        instance(&server, None, Some("token")),
        cache_dir.path(),
        browser.clone(),
    );
    assert_eq!(client.strategy(), AuthStrategy::DirectToken);

    let result = client
        .get("content/123", Some(&[("expand", "body.storage,version")][..]))
        .await
        .unwrap();

    assert_eq!(result["title"], "Runbook");
    assert_eq!(browser.launches.load(Ordering::SeqCst), 0);
    assert_eq!(std::fs::read_dir(cache_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn direct_strategy_does_not_retry_401() {
    let server = MockServer::start().await;
    let cache_dir = tempfile::tempdir().unwrap();
    let browser = working_browser();

    Mock::given(method("GET"))
        .and(path(CONTENT_PATH))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"message": "Authentication failed"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(instance(&server, None, None), cache_dir.path(), browser.clone());
    assert_eq!(client.strategy(), AuthStrategy::DirectPassword);

    let err = client.get("content/123", None).await.unwrap_err();
    match err {
        Error::Api { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "Authentication failed");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(browser.launches.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Cookie strategy
// ============================================================================

#[tokio::test]
async fn cookie_strategy_logs_in_when_no_cache() {
    let server = MockServer::start().await;
    let cache_dir = tempfile::tempdir().unwrap();
    let browser = working_browser();

    mount_probe(&server, 200, 0).await;
    Mock::given(method("GET"))
        .and(path(CONTENT_PATH))
        .and(header("cookie", cookie("fresh-1").as_str()))
        .and(header("authorization", proxy().header_value().as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(page()))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(
        instance(&server, Some(proxy()), Some("token")),
        cache_dir.path(),
        browser.clone(),
    );
    assert_eq!(client.strategy(), AuthStrategy::CookieViaProxyLogin);

    let result = client.get("content/123", None).await.unwrap();
    assert_eq!(result["id"], "123");

    assert_eq!(browser.launches.load(Ordering::SeqCst), 1);
    assert_eq!(browser.closes.load(Ordering::SeqCst), 1);
    let stored = SessionCache::new(cache_dir.path()).load("PROD").unwrap();
    assert_eq!(stored.cookie_value, "fresh-1");
}

#[tokio::test]
async fn cookie_strategy_reuses_valid_cache() {
    let server = MockServer::start().await;
    let cache_dir = tempfile::tempdir().unwrap();
    let browser = working_browser();
    let cache = SessionCache::new(cache_dir.path());
    cache
        .store("PROD", &CachedSession::new("seraph.confluence", "cached"))
        .unwrap();

    Mock::given(method("GET"))
        .and(path(PROBE_PATH))
        .and(header("cookie", cookie("cached").as_str()))
        .and(header("authorization", proxy().header_value().as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"username": "alice"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(CONTENT_PATH))
        .and(header("cookie", cookie("cached").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(page()))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(
        instance(&server, Some(proxy()), None),
        cache_dir.path(),
        browser.clone(),
    );
    client.get("content/123", None).await.unwrap();

    assert_eq!(browser.launches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn session_is_validated_once_per_client() {
    let server = MockServer::start().await;
    let cache_dir = tempfile::tempdir().unwrap();
    let browser = working_browser();
    SessionCache::new(cache_dir.path())
        .store("PROD", &CachedSession::new("seraph.confluence", "cached"))
        .unwrap();

    mount_probe(&server, 200, 1).await;
    Mock::given(method("GET"))
        .and(path(CONTENT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(page()))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(
        instance(&server, Some(proxy()), None),
        cache_dir.path(),
        browser.clone(),
    );
    client.get("content/123", None).await.unwrap();
    client.get("content/123", None).await.unwrap();

    assert_eq!(browser.launches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn expired_cache_skips_probe_and_logs_in() {
    let server = MockServer::start().await;
    let cache_dir = tempfile::tempdir().unwrap();
    let browser = working_browser();
    let mut old = CachedSession::new("seraph.confluence", "old");
    old.created_at = Utc::now() - chrono::Duration::days(8);
    SessionCache::new(cache_dir.path()).store("PROD", &old).unwrap();

    mount_probe(&server, 200, 0).await;
    Mock::given(method("GET"))
        .and(path(CONTENT_PATH))
        .and(header("cookie", cookie("fresh-1").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(page()))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(
        instance(&server, Some(proxy()), None),
        cache_dir.path(),
        browser.clone(),
    );
    client.get("content/123", None).await.unwrap();

    assert_eq!(browser.launches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rejected_probe_triggers_login() {
    let server = MockServer::start().await;
    let cache_dir = tempfile::tempdir().unwrap();
    let browser = working_browser();
    SessionCache::new(cache_dir.path())
        .store("PROD", &CachedSession::new("seraph.confluence", "revoked"))
        .unwrap();

    mount_probe(&server, 401, 1).await;
    Mock::given(method("GET"))
        .and(path(CONTENT_PATH))
        .and(header("cookie", cookie("fresh-1").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(page()))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(
        instance(&server, Some(proxy()), None),
        cache_dir.path(),
        browser.clone(),
    );
    client.get("content/123", None).await.unwrap();

    assert_eq!(browser.launches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn second_401_is_surfaced_without_third_attempt() {
    let server = MockServer::start().await;
    let cache_dir = tempfile::tempdir().unwrap();
    let browser = working_browser();
    let cache = SessionCache::new(cache_dir.path());
    cache
        .store("PROD", &CachedSession::new("seraph.confluence", "cached"))
        .unwrap();

    mount_probe(&server, 200, 1).await;
    Mock::given(method("GET"))
        .and(path(CONTENT_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(
        instance(&server, Some(proxy()), None),
        cache_dir.path(),
        browser.clone(),
    );
    let err = client.get("content/123", None).await.unwrap_err();

    match err {
        Error::Api { status, ref message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "Unauthorized");
        }
        ref other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(browser.launches.load(Ordering::SeqCst), 1);
    // The old session was replaced by the one from the re-login
    assert_eq!(cache.load("PROD").unwrap().cookie_value, "fresh-1");
}

#[tokio::test]
async fn retry_after_401_uses_new_cookie() {
    let server = MockServer::start().await;
    let cache_dir = tempfile::tempdir().unwrap();
    let browser = working_browser();
    SessionCache::new(cache_dir.path())
        .store("PROD", &CachedSession::new("seraph.confluence", "cached"))
        .unwrap();

    mount_probe(&server, 200, 1).await;
    Mock::given(method("PUT"))
        .and(path(CONTENT_PATH))
        .and(header("cookie", cookie("cached").as_str()))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(CONTENT_PATH))
        .and(header("cookie", cookie("fresh-1").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"version": {"number": 2}})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(
        instance(&server, Some(proxy()), None),
        cache_dir.path(),
        browser.clone(),
    );
    let body = json!({"type": "page", "title": "Runbook", "version": {"number": 2}});
    let result = client.put("content/123", &body).await.unwrap();

    assert_eq!(result["version"]["number"], 2);
    assert_eq!(browser.launches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_login_form_fails_without_writing_cache() {
    let server = MockServer::start().await;
    let cache_dir = tempfile::tempdir().unwrap();
    let browser = Arc::new(BrowserState::default());

    Mock::given(method("GET"))
        .and(path(CONTENT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(page()))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(
        instance(&server, Some(proxy()), None),
        cache_dir.path(),
        browser.clone(),
    );
    let err = client.get("content/123", None).await.unwrap_err();

    assert!(matches!(err, Error::Login(ref msg) if msg == "username field not found"));
    assert_eq!(browser.launches.load(Ordering::SeqCst), 1);
    assert_eq!(browser.closes.load(Ordering::SeqCst), 1);
    assert!(SessionCache::new(cache_dir.path()).load("PROD").is_none());
    assert!(!SessionCache::new(cache_dir.path()).path("PROD").exists());
}

// ============================================================================
// Response handling
// ============================================================================

#[tokio::test]
async fn empty_body_decodes_to_empty_object() {
    let server = MockServer::start().await;
    let cache_dir = tempfile::tempdir().unwrap();

    Mock::given(method("DELETE"))
        .and(path(CONTENT_PATH))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(
        instance(&server, None, Some("token")),
        cache_dir.path(),
        working_browser(),
    );
    let result = client.delete("/content/123").await.unwrap();
    assert_eq!(result, json!({}));
}

#[tokio::test]
async fn post_sends_json_body() {
    let server = MockServer::start().await;
    let cache_dir = tempfile::tempdir().unwrap();
    let body = json!({"type": "page", "title": "New page", "space": {"key": "DEV"}});

    Mock::given(method("POST"))
        .and(path("/rest/api/content"))
        .and(wiremock::matchers::body_json(body.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "456"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(
        instance(&server, None, Some("token")),
        cache_dir.path(),
        working_browser(),
    );
    let result = client.post("content", &body).await.unwrap();
    assert_eq!(result["id"], "456");
}

#[tokio::test]
async fn error_message_comes_from_json_body() {
    let server = MockServer::start().await;
    let cache_dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/rest/api/content/999"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "statusCode": 404,
            "message": "No content found with id: 999"
        })))
        .mount(&server)
        .await;

    let client = client_for(
        instance(&server, None, Some("token")),
        cache_dir.path(),
        working_browser(),
    );
    let err = client.get("content/999", None).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert_eq!(err.to_string(), "API error (404): No content found with id: 999");
}

#[tokio::test]
async fn non_json_success_is_invalid_response() {
    let server = MockServer::start().await;
    let cache_dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path(CONTENT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
        .mount(&server)
        .await;

    let client = client_for(
        instance(&server, None, Some("token")),
        cache_dir.path(),
        working_browser(),
    );
    let err = client.get("content/123", None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidResponse(_)));
}

#[tokio::test]
async fn unreachable_server_is_transport_error() {
    let cache_dir = tempfile::tempdir().unwrap();
    let instance = InstanceCredentialConfig {
        name: "DOWN".to_string(),
        base_url: "http://127.0.0.1:9".to_string(),
        username: Some("alice".to_string()),
        password: None,
        token: Some("token".to_string()),
        proxy: None,
    };

    let client = client_for(instance, cache_dir.path(), working_browser());
    let err = client.get("content/123", None).await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
}

#[tokio::test]
async fn forced_login_requires_cookie_strategy() {
    let server = MockServer::start().await;
    let cache_dir = tempfile::tempdir().unwrap();
    let browser = working_browser();

    let direct = client_for(
        instance(&server, None, Some("token")),
        cache_dir.path(),
        browser.clone(),
    );
    assert!(matches!(direct.login().await, Err(Error::Configuration(_))));

    let proxied = client_for(
        instance(&server, Some(proxy()), None),
        cache_dir.path(),
        browser.clone(),
    );
    let session = proxied.login().await.unwrap();
    assert_eq!(session.cookie_value, "fresh-1");
    assert_eq!(SessionCache::new(cache_dir.path()).load("PROD"), Some(session));
}
