//! Bearer token authentication middleware.
//!
//! # Security Features
//!
//! - **Cryptographic verification first**: no claim is trusted before the
//!   token's HMAC signature checks out (see [`crate::token`])
//! - **No detail leakage**: every verification failure renders as the same
//!   generic 401; the precise reason is only logged server-side
//! - **Brute force protection**: repeated failures from one client address
//!   are throttled via a keyed `governor` limiter before more verification
//!   work is spent on them
//!
//! # Identity Propagation
//!
//! On success the verified [`AuthenticatedIdentity`] is attached to the
//! request as an extension. The proxy forwarder is the single place that
//! turns it into `x-user-id` / `x-user-email` / `x-user-role` headers —
//! and it drops any client-supplied copy of those headers unconditionally,
//! so downstream services only ever see identities minted here.
//!
//! # Unauthenticated Routes
//!
//! Exactly the login route bypasses this component, structurally: its route
//! group simply does not carry this layer. There is no path allow-list to
//! drift out of sync.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::AUTHORIZATION;
use axum::http::{Request, Response};
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::metrics;
use crate::middleware::ip::{TrustedProxies, client_key};
use crate::middleware::request_id::RequestContextExt;
use crate::token;

/// Maximum auth failures per client per minute before throttling kicks in.
const AUTH_FAILURE_LIMIT: NonZeroU32 = NonZeroU32::new(10).unwrap();

/// Burst capacity for the auth failure limiter.
const AUTH_FAILURE_BURST: NonZeroU32 = NonZeroU32::new(5).unwrap();

/// Scope label used when throttled auth failures are rejected.
const AUTH_THROTTLE_SCOPE: &str = "auth";

/// Type alias for the per-client auth failure limiter.
type AuthFailureLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Bearer token authentication layer.
#[derive(Clone)]
pub struct BearerAuth {
    /// Shared secret the tokens are signed with.
    secret: Arc<Vec<u8>>,
    /// Tracks verification failures per client address.
    failure_limiter: Arc<AuthFailureLimiter>,
    /// Trusted proxy configuration for client identification.
    trusted_proxies: Arc<TrustedProxies>,
}

impl BearerAuth {
    /// Create an auth layer verifying against `secret`.
    pub fn new(secret: &str, trusted_proxies: Arc<TrustedProxies>) -> Self {
        let quota = Quota::per_minute(AUTH_FAILURE_LIMIT).allow_burst(AUTH_FAILURE_BURST);
        Self {
            secret: Arc::new(secret.as_bytes().to_vec()),
            failure_limiter: Arc::new(RateLimiter::keyed(quota)),
            trusted_proxies,
        }
    }
}

impl<S> Layer<S> for BearerAuth {
    type Service = BearerAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BearerAuthService {
            inner,
            secret: self.secret.clone(),
            failure_limiter: self.failure_limiter.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

/// Bearer token authentication service wrapper.
#[derive(Clone)]
pub struct BearerAuthService<S> {
    inner: S,
    secret: Arc<Vec<u8>>,
    failure_limiter: Arc<AuthFailureLimiter>,
    trusted_proxies: Arc<TrustedProxies>,
}

impl<S> Service<Request<Body>> for BearerAuthService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let secret = self.secret.clone();
        let failure_limiter = self.failure_limiter.clone();
        let trusted_proxies = self.trusted_proxies.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let ctx = req.request_context();
            let path = req.uri().path().to_string();

            let bearer = req
                .headers()
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(|token| token.trim().to_string());

            let verified = match bearer {
                Some(token) => match token::verify(&token, &secret) {
                    Ok(identity) => Ok(identity),
                    Err(reason) => {
                        // The reason stays in the logs; the wire sees 401.
                        warn!(
                            request_id = %ctx.correlation_id,
                            path = %path,
                            %reason,
                            "Token verification failed"
                        );
                        Err(())
                    }
                },
                None => {
                    warn!(
                        request_id = %ctx.correlation_id,
                        path = %path,
                        "Missing or malformed Authorization header"
                    );
                    Err(())
                }
            };

            match verified {
                Ok(identity) => {
                    debug!(
                        request_id = %ctx.correlation_id,
                        subject = %identity.subject,
                        role = %identity.role,
                        "Token verified"
                    );
                    req.extensions_mut().insert(identity);
                    inner.call(req).await
                }
                Err(()) => {
                    metrics::record_auth_failure();
                    let client = client_key(&req, &trusted_proxies);

                    // Repeated failures from one client are throttled before
                    // they cost any more verification work.
                    if let Err(not_until) = failure_limiter.check_key(&client) {
                        let wait = not_until.wait_time_from(DefaultClock::default().now());
                        warn!(
                            request_id = %ctx.correlation_id,
                            client = %client,
                            "Excessive authentication failures, throttling client"
                        );
                        return Ok(GatewayError::RateLimited {
                            scope: AUTH_THROTTLE_SCOPE,
                            retry_after: wait,
                            limit: AUTH_FAILURE_LIMIT.get(),
                        }
                        .into_response_with(&ctx.correlation_id));
                    }

                    Ok(GatewayError::Unauthorized.into_response_with(&ctx.correlation_id))
                }
            }
        })
    }
}
