//! Shared fixtures for gateway integration tests.
//!
//! Each test builds an isolated gateway (own state, own breakers, own
//! rate-limit windows) bound to an ephemeral port, talking to in-process
//! mock upstreams. Nothing is shared across test cases, so admission state
//! can never bleed between them.
#![allow(clippy::unwrap_used, clippy::expect_used)]
#![allow(dead_code)] // Not every fixture is used by every test binary.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::IntoResponse;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use edge_gateway::{AppState, Config, build_router};

/// Secret every test gateway and test token share.
pub const TEST_SECRET: &str = "integration-test-secret";

/// Mint an HS256 token signed with `secret`.
pub fn make_token_with_secret(claims: &serde_json::Value, secret: &str) -> String {
    let header = URL_SAFE_NO_PAD
        .encode(serde_json::to_vec(&serde_json::json!({"alg": "HS256", "typ": "JWT"})).unwrap());
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
    let signing_input = format!("{header}.{payload}");
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    format!("{signing_input}.{signature}")
}

/// Mint a valid token for the shared test secret.
pub fn make_token(claims: &serde_json::Value) -> String {
    make_token_with_secret(claims, TEST_SECRET)
}

/// A user token most tests can reuse.
pub fn user_token() -> String {
    make_token(&serde_json::json!({"sub": "user-1", "role": "user", "email": "u1@example.com"}))
}

/// In-process mock upstream with switchable failure mode.
///
/// Responds 200 with a small JSON echo by default; 500 while `fail` is set.
/// Requests to a path ending in `/login` answer 401, standing in for the
/// user service rejecting bad credentials.
pub struct MockUpstream {
    /// Address the mock listens on.
    pub addr: SocketAddr,
    /// Base URL including the mount point, ready for gateway config.
    pub base_url: String,
    /// While true, every response is a 500.
    pub fail: Arc<AtomicBool>,
    /// Headers of the most recent request the mock received.
    pub last_headers: Arc<Mutex<Option<HeaderMap>>>,
    /// Total requests that reached the mock.
    pub hits: Arc<AtomicUsize>,
}

impl MockUpstream {
    /// Start a mock mounted at `mount` (e.g. "/api/users") on an ephemeral
    /// port.
    pub async fn start(mount: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve_on(listener, mount).await
    }

    /// Start a mock on a specific pre-bound listener (used to "restart" an
    /// upstream on a known port).
    pub async fn serve_on(listener: TcpListener, mount: &str) -> Self {
        let addr = listener.local_addr().unwrap();
        let fail = Arc::new(AtomicBool::new(false));
        let last_headers: Arc<Mutex<Option<HeaderMap>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicUsize::new(0));

        let app = mock_router(fail.clone(), last_headers.clone(), hits.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            base_url: format!("http://{addr}{mount}"),
            fail,
            last_headers,
            hits,
        }
    }

    /// Switch the mock into 500-mode (or back).
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    /// Headers of the most recent request, if any arrived.
    pub async fn last_headers(&self) -> Option<HeaderMap> {
        self.last_headers.lock().await.clone()
    }

    /// Total requests that reached the mock.
    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn mock_router(
    fail: Arc<AtomicBool>,
    last_headers: Arc<Mutex<Option<HeaderMap>>>,
    hits: Arc<AtomicUsize>,
) -> Router {
    Router::new().fallback(move |req: Request<Body>| {
        let fail = fail.clone();
        let last_headers = last_headers.clone();
        let hits = hits.clone();
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            let path = req.uri().path().to_string();
            *last_headers.lock().await = Some(req.headers().clone());

            if fail.load(Ordering::SeqCst) {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    axum::Json(serde_json::json!({"error": "upstream exploded"})),
                )
                    .into_response();
            }

            if path.ends_with("/login") {
                return (
                    StatusCode::UNAUTHORIZED,
                    axum::Json(serde_json::json!({"error": "invalid credentials"})),
                )
                    .into_response();
            }

            axum::Json(serde_json::json!({"ok": true, "path": path})).into_response()
        }
    })
}

/// A running gateway instance bound to an ephemeral port.
pub struct TestGateway {
    pub base_url: String,
    pub client: reqwest::Client,
}

impl TestGateway {
    /// Build and serve a gateway with the given config, waiting until its
    /// health endpoint answers.
    pub async fn start(config: Config) -> Self {
        let state = AppState::new(config).unwrap();
        let app = build_router(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        let base_url = format!("http://{addr}");
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();

        let gateway = Self { base_url, client };
        gateway.wait_until_healthy().await;
        gateway
    }

    async fn wait_until_healthy(&self) {
        for _ in 0..50 {
            if let Ok(response) = self.client.get(self.url("/health")).send().await
                && response.status() == StatusCode::OK
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("gateway did not become healthy in time");
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

/// A config tuned for fast tests: generous default limits, short breaker
/// windows, metrics disabled.
pub fn test_config(users_base: &str, notes_base: &str) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        users_service_url: users_base.trim_end_matches('/').to_string(),
        notes_service_url: notes_base.trim_end_matches('/').to_string(),
        upstream_timeout: Duration::from_secs(2),
        upstream_connect_timeout: Duration::from_millis(500),
        breaker_failure_threshold: 3,
        breaker_open_duration: Duration::from_millis(300),
        jwt_secret: TEST_SECRET.to_string(),
        metrics_port: 0,
        ..Config::default()
    }
}
