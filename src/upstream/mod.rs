//! Upstream services and the reverse-proxy forwarder.
//!
//! The gateway fronts exactly two upstreams — the user/auth service and the
//! notes service — reached through one shared, timeout-bounded HTTP client.
//! [`UpstreamPool`] owns that client plus one [`CircuitBreaker`] per
//! upstream, and is handed around by reference so tests can build isolated
//! pools (no process-global state).
//!
//! # Forwarding contract
//!
//! - The inbound prefix (`/api/users`, `/api/notes`) is stripped and the
//!   remainder plus query string is appended to the configured base URL;
//!   the base URL carries the upstream's mount point.
//! - Hop-by-hop headers are dropped. Any client-supplied `x-user-*` identity
//!   header is dropped unconditionally — identity headers reach an upstream
//!   only when this gateway injects them from a verified token. The original
//!   `Authorization` header and the request's correlation id are always
//!   forwarded.
//! - A connection error or timeout is an upstream failure: it feeds the
//!   breaker and is rendered as a normalized 502, never a raw error.
//!   An upstream reply of 500+ is treated the same way. Everything else
//!   (4xx included) counts as upstream success and is relayed unchanged.
//! - There are no retries. If the client goes away while the call is in
//!   flight, the future is dropped and [`OutcomeGuard`] records the
//!   unresolved call as a failure so an abandoned probe cannot wedge the
//!   breaker in half-open.

pub mod circuit_breaker;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, Response};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{GatewayError, GatewayResult};
use crate::middleware::request_id::RequestContext;
use crate::token::AuthenticatedIdentity;
use self::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};

/// Identity headers only this gateway may set.
pub const HEADER_USER_ID: &str = "x-user-id";
pub const HEADER_USER_EMAIL: &str = "x-user-email";
pub const HEADER_USER_ROLE: &str = "x-user-role";

/// Correlation header, forwarded upstream and returned to clients.
pub const HEADER_REQUEST_ID: &str = "x-request-id";

/// A backend service the gateway proxies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Upstream {
    /// The user/auth service (also serves the login route).
    Users,
    /// The notes service.
    Notes,
}

impl Upstream {
    /// Label used in envelopes, logs, and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Upstream::Users => "users",
            Upstream::Notes => "notes",
        }
    }

    /// Inbound path prefix owned by this upstream.
    pub fn inbound_prefix(self) -> &'static str {
        match self {
            Upstream::Users => "/api/users",
            Upstream::Notes => "/api/notes",
        }
    }
}

impl std::fmt::Display for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared upstream client plus per-upstream breakers.
pub struct UpstreamPool {
    http: reqwest::Client,
    users_base: String,
    notes_base: String,
    users_breaker: Arc<CircuitBreaker>,
    notes_breaker: Arc<CircuitBreaker>,
    body_limit: usize,
}

impl UpstreamPool {
    /// Build the pool from configuration.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Config` if the HTTP client cannot be built.
    pub fn new(config: &Config) -> GatewayResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .connect_timeout(config.upstream_connect_timeout)
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build upstream client: {e}")))?;

        let breaker_config = CircuitBreakerConfig {
            failure_threshold: config.breaker_failure_threshold,
            open_duration: config.breaker_open_duration,
        };

        Ok(Self {
            http,
            users_base: config.users_service_url.clone(),
            notes_base: config.notes_service_url.clone(),
            users_breaker: Arc::new(CircuitBreaker::new(
                Upstream::Users.as_str(),
                breaker_config,
            )),
            notes_breaker: Arc::new(CircuitBreaker::new(
                Upstream::Notes.as_str(),
                breaker_config,
            )),
            body_limit: config.max_request_body_size,
        })
    }

    /// The breaker guarding one upstream.
    pub fn breaker(&self, upstream: Upstream) -> &Arc<CircuitBreaker> {
        match upstream {
            Upstream::Users => &self.users_breaker,
            Upstream::Notes => &self.notes_breaker,
        }
    }

    fn base_url(&self, upstream: Upstream) -> &str {
        match upstream {
            Upstream::Users => &self.users_base,
            Upstream::Notes => &self.notes_base,
        }
    }

    /// Forward an admitted (and, where required, authenticated) request.
    ///
    /// The admission decision has already been made by the breaker gate;
    /// this method performs the single upstream attempt and settles the
    /// breaker outcome.
    ///
    /// # Errors
    ///
    /// `GatewayError::Upstream` for transport failures, timeouts, and 5xx
    /// replies; `GatewayError::Internal` for body-assembly faults.
    pub async fn forward(
        &self,
        upstream: Upstream,
        ctx: &RequestContext,
        identity: Option<&AuthenticatedIdentity>,
        request: Request<Body>,
    ) -> GatewayResult<Response<Body>> {
        let (parts, body) = request.into_parts();

        let target = rewrite_uri(self.base_url(upstream), upstream.inbound_prefix(), &parts.uri);
        let outbound_headers = build_outbound_headers(&parts.headers, ctx, identity);

        let body_bytes = axum::body::to_bytes(body, self.body_limit)
            .await
            .map_err(|e| GatewayError::Internal(format!("failed to buffer request body: {e}")))?;

        debug!(
            request_id = %ctx.correlation_id,
            upstream = %upstream,
            target = %target,
            "Forwarding request"
        );

        let breaker = Arc::clone(self.breaker(upstream));
        // Covers the in-flight window: if this future is dropped before the
        // upstream answered, the unresolved call still counts as a failure.
        let guard = OutcomeGuard::new(Arc::clone(&breaker));
        let send_result = self
            .http
            .request(parts.method, target.as_str())
            .headers(outbound_headers)
            .body(body_bytes)
            .send()
            .await;
        guard.disarm();

        let response = match send_result {
            Ok(response) => response,
            Err(e) => {
                breaker.record_failure().await;
                let reason = if e.is_timeout() {
                    "upstream call timed out".to_string()
                } else {
                    format!("upstream connection failed: {e}")
                };
                return Err(GatewayError::Upstream { upstream, reason });
            }
        };

        let status = response.status();
        if status.is_server_error() {
            breaker.record_failure().await;
            return Err(GatewayError::Upstream {
                upstream,
                reason: format!("upstream returned {status}"),
            });
        }
        breaker.record_success().await;

        relay(response).await.map_err(|reason| GatewayError::Upstream { upstream, reason })
    }
}

/// Turn the inbound URI into the upstream target URL.
///
/// The remainder after the inbound prefix (plus any query string) is joined
/// onto the base URL; the base URL carries the upstream's mount point.
fn rewrite_uri(base: &str, inbound_prefix: &str, uri: &axum::http::Uri) -> String {
    let path = uri.path();
    let rest = path.strip_prefix(inbound_prefix).unwrap_or(path);
    match uri.query() {
        Some(query) => format!("{base}{rest}?{query}"),
        None => format!("{base}{rest}"),
    }
}

/// Copy forwardable inbound headers and inject the trusted set.
///
/// Hop-by-hop headers never cross the proxy. Client-supplied identity
/// headers are dropped here no matter what — on unauthenticated routes
/// nothing replaces them, so an upstream only ever sees identity headers
/// minted by this gateway.
fn build_outbound_headers(
    inbound: &HeaderMap,
    ctx: &RequestContext,
    identity: Option<&AuthenticatedIdentity>,
) -> HeaderMap {
    let mut outbound = HeaderMap::with_capacity(inbound.len() + 4);

    for (name, value) in inbound {
        if is_hop_by_hop(name) || is_identity_header(name) || name == HEADER_REQUEST_ID {
            continue;
        }
        outbound.append(name.clone(), value.clone());
    }

    // Correlation id travels with the request under our control.
    if let Ok(value) = HeaderValue::from_str(&ctx.correlation_id) {
        outbound.insert(HeaderName::from_static(HEADER_REQUEST_ID), value);
    }

    if let Some(identity) = identity {
        match HeaderValue::from_str(&identity.subject) {
            Ok(value) => {
                outbound.insert(HeaderName::from_static(HEADER_USER_ID), value);
            }
            Err(_) => warn!("Subject claim not representable as a header, omitting x-user-id"),
        }
        outbound.insert(
            HeaderName::from_static(HEADER_USER_ROLE),
            HeaderValue::from_static(identity.role.as_str()),
        );
        if let Some(email) = identity.email.as_deref()
            && let Ok(value) = HeaderValue::from_str(email)
        {
            outbound.insert(HeaderName::from_static(HEADER_USER_EMAIL), value);
        }
    }

    outbound
}

/// Headers that describe one hop, not the end-to-end request.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "host"
            | "content-length"
    )
}

fn is_identity_header(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        HEADER_USER_ID | HEADER_USER_EMAIL | HEADER_USER_ROLE
    )
}

/// Relay the upstream reply unchanged: status, headers, body.
async fn relay(response: reqwest::Response) -> Result<Response<Body>, String> {
    let status = response.status();
    let mut builder = Response::builder().status(status);

    for (name, value) in response.headers() {
        if is_hop_by_hop(name) {
            continue;
        }
        builder = builder.header(name, value);
    }

    // The upstream answered; from here, body trouble no longer changes the
    // breaker outcome.
    let bytes = response
        .bytes()
        .await
        .map_err(|e| format!("failed to read upstream body: {e}"))?;

    builder
        .body(Body::from(bytes))
        .map_err(|e| format!("failed to assemble relayed response: {e}"))
}

/// Records an upstream failure if dropped before the call settled.
///
/// Client disconnects drop the handler future mid-`await`; the upstream
/// never answered from the gateway's point of view, so the breaker must
/// still learn about it — especially when the abandoned call was the
/// recovery probe.
struct OutcomeGuard {
    breaker: Option<Arc<CircuitBreaker>>,
}

impl OutcomeGuard {
    fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            breaker: Some(breaker),
        }
    }

    /// The call settled; classification happens at the call site.
    fn disarm(mut self) {
        self.breaker = None;
    }
}

impl Drop for OutcomeGuard {
    fn drop(&mut self) {
        if let Some(breaker) = self.breaker.take() {
            warn!(
                upstream = breaker.label(),
                "Upstream call abandoned before completion, recording failure"
            );
            tokio::spawn(async move {
                breaker.record_failure().await;
            });
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::token::Role;
    use std::time::{Duration, Instant};

    fn ctx() -> RequestContext {
        RequestContext {
            correlation_id: "test-correlation".to_string(),
            started_at: Instant::now(),
        }
    }

    #[test]
    fn test_rewrite_strips_prefix_and_keeps_query() {
        let uri: axum::http::Uri = "/api/users/42/profile?full=true".parse().unwrap();
        assert_eq!(
            rewrite_uri("http://users:7101/api/users", "/api/users", &uri),
            "http://users:7101/api/users/42/profile?full=true"
        );
    }

    #[test]
    fn test_rewrite_bare_prefix() {
        let uri: axum::http::Uri = "/api/notes".parse().unwrap();
        assert_eq!(
            rewrite_uri("http://notes:7102/api/notes", "/api/notes", &uri),
            "http://notes:7102/api/notes"
        );
    }

    #[test]
    fn test_rewrite_login_path() {
        let uri: axum::http::Uri = "/api/users/login".parse().unwrap();
        assert_eq!(
            rewrite_uri("http://users:7101/api/users", "/api/users", &uri),
            "http://users:7101/api/users/login"
        );
    }

    #[test]
    fn test_client_identity_headers_never_pass_through() {
        let mut inbound = HeaderMap::new();
        inbound.insert("x-user-role", HeaderValue::from_static("admin"));
        inbound.insert("x-user-id", HeaderValue::from_static("intruder"));
        inbound.insert("x-user-email", HeaderValue::from_static("spoof@evil"));
        inbound.insert("accept", HeaderValue::from_static("application/json"));

        // Unauthenticated path: nothing replaces the stripped headers.
        let outbound = build_outbound_headers(&inbound, &ctx(), None);

        assert!(!outbound.contains_key("x-user-role"));
        assert!(!outbound.contains_key("x-user-id"));
        assert!(!outbound.contains_key("x-user-email"));
        assert_eq!(outbound.get("accept").unwrap(), "application/json");
    }

    #[test]
    fn test_verified_identity_overwrites_client_headers() {
        let mut inbound = HeaderMap::new();
        inbound.insert("x-user-role", HeaderValue::from_static("admin"));
        inbound.insert("x-user-id", HeaderValue::from_static("intruder"));

        let identity = AuthenticatedIdentity {
            subject: "user-7".to_string(),
            role: Role::User,
            email: Some("u7@example.com".to_string()),
        };
        let outbound = build_outbound_headers(&inbound, &ctx(), Some(&identity));

        assert_eq!(outbound.get("x-user-id").unwrap(), "user-7");
        assert_eq!(outbound.get("x-user-role").unwrap(), "user");
        assert_eq!(outbound.get("x-user-email").unwrap(), "u7@example.com");
    }

    #[test]
    fn test_correlation_and_authorization_are_forwarded() {
        let mut inbound = HeaderMap::new();
        inbound.insert("authorization", HeaderValue::from_static("Bearer abc"));
        inbound.insert("x-request-id", HeaderValue::from_static("client-sent"));

        let outbound = build_outbound_headers(&inbound, &ctx(), None);

        assert_eq!(outbound.get("authorization").unwrap(), "Bearer abc");
        // The context value wins over whatever the client header said.
        assert_eq!(outbound.get("x-request-id").unwrap(), "test-correlation");
    }

    #[test]
    fn test_hop_by_hop_headers_are_dropped() {
        let mut inbound = HeaderMap::new();
        inbound.insert("connection", HeaderValue::from_static("keep-alive"));
        inbound.insert("host", HeaderValue::from_static("gateway.local"));
        inbound.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        inbound.insert("content-type", HeaderValue::from_static("application/json"));

        let outbound = build_outbound_headers(&inbound, &ctx(), None);

        assert!(!outbound.contains_key("connection"));
        assert!(!outbound.contains_key("host"));
        assert!(!outbound.contains_key("transfer-encoding"));
        assert!(outbound.contains_key("content-type"));
    }

    #[tokio::test]
    async fn test_outcome_guard_records_failure_on_drop() {
        let breaker = Arc::new(CircuitBreaker::new(
            "guard-test",
            CircuitBreakerConfig {
                failure_threshold: 1,
                open_duration: Duration::from_secs(30),
            },
        ));

        {
            let _guard = OutcomeGuard::new(Arc::clone(&breaker));
            // Dropped without disarm - as if the client disconnected.
        }
        // Let the spawned recording task run.
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(
            breaker.snapshot().await.state,
            circuit_breaker::CircuitState::Open
        );
    }

    #[tokio::test]
    async fn test_outcome_guard_disarmed_is_silent() {
        let breaker = Arc::new(CircuitBreaker::new(
            "guard-test-2",
            CircuitBreakerConfig {
                failure_threshold: 1,
                open_duration: Duration::from_secs(30),
            },
        ));

        let guard = OutcomeGuard::new(Arc::clone(&breaker));
        guard.disarm();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(
            breaker.snapshot().await.state,
            circuit_breaker::CircuitState::Closed
        );
    }
}
