//! Per-scope rate limiting middleware.
//!
//! Each route group carries one instance of this layer bound to its scope
//! (`login`, `users`, or `notes`); all instances share the process-wide
//! [`FixedWindowLimiter`], so the scopes stay independently configured while
//! living in one place. The login route group carries only the `login`-scope
//! layer, which is how login traffic stays out of the broader `users` budget
//! while being capped by its own stricter one.
//!
//! # Response Headers
//!
//! On rate limit exceeded (429):
//! - `Retry-After`: Seconds until the window rolls over (ceiling)
//! - `X-RateLimit-Limit`: Configured maximum for the scope
//! - `X-RateLimit-Remaining`: Always 0 at this point
//!
//! The body is the standard error envelope with code `RATE_LIMITED`, the
//! scope name, and `retryAfterSeconds`.
//!
//! # Client Identification
//!
//! Requests are keyed by client address via [`super::ip::client_key`], which
//! only honors forwarded headers from trusted proxy networks.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response};
use tower::{Layer, Service};

use crate::error::GatewayError;
use crate::limiter::{Admission, FixedWindowLimiter, Scope};
use crate::metrics;
use crate::middleware::ip::{TrustedProxies, client_key};
use crate::middleware::request_id::RequestContextExt;

/// Rate limiting layer bound to one scope.
#[derive(Clone)]
pub struct ScopedRateLimitLayer {
    limiter: Arc<FixedWindowLimiter>,
    scope: Scope,
    trusted_proxies: Arc<TrustedProxies>,
}

impl ScopedRateLimitLayer {
    /// Create a layer enforcing `scope` against the shared limiter.
    pub fn new(
        limiter: Arc<FixedWindowLimiter>,
        scope: Scope,
        trusted_proxies: Arc<TrustedProxies>,
    ) -> Self {
        Self {
            limiter,
            scope,
            trusted_proxies,
        }
    }
}

impl<S> Layer<S> for ScopedRateLimitLayer {
    type Service = ScopedRateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ScopedRateLimitService {
            inner,
            limiter: self.limiter.clone(),
            scope: self.scope,
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct ScopedRateLimitService<S> {
    inner: S,
    limiter: Arc<FixedWindowLimiter>,
    scope: Scope,
    trusted_proxies: Arc<TrustedProxies>,
}

impl<S> Service<Request<Body>> for ScopedRateLimitService<S>
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

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let scope = self.scope;
        let limit = self.limiter.limit(scope);
        let key = client_key(&req, &self.trusted_proxies);
        // Classification is synchronous and never fails; only the admitted
        // path needs the boxed future.
        let admission = self.limiter.admit(scope, &key);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match admission {
                Admission::Admitted { .. } => inner.call(req).await,
                Admission::Rejected { retry_after } => {
                    metrics::record_rate_limited(scope.as_str());
                    let ctx = req.request_context();
                    let mut response = GatewayError::RateLimited {
                        scope: scope.as_str(),
                        retry_after,
                        limit: limit.max,
                    }
                    .into_response_with(&ctx.correlation_id);

                    let headers = response.headers_mut();
                    if let Ok(value) = limit.max.to_string().parse() {
                        headers.insert("X-RateLimit-Limit", value);
                    }
                    headers.insert(
                        "X-RateLimit-Remaining",
                        axum::http::HeaderValue::from_static("0"),
                    );

                    Ok(response)
                }
            }
        })
    }
}
