//! Circuit breaker gate middleware.
//!
//! Sits between rate-limit admission and token verification on every proxied
//! route group, so a dead upstream answers `503 CIRCUIT_OPEN` immediately —
//! before any signature work is spent on the request — and no upstream call
//! is ever attempted while its circuit is open.
//!
//! The gate is the **only** place that consults the breaker's admission
//! decision; the forwarder merely records outcomes. That split keeps the
//! single-probe invariant intact: the preflight that transitions an expired
//! Open circuit admits exactly one request as the recovery probe, and a
//! second consultation of the breaker for the same request would wrongly
//! reject it as a concurrent probe.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response};
use tower::{Layer, Service};
use tracing::debug;

use crate::error::GatewayError;
use crate::middleware::request_id::RequestContextExt;
use crate::upstream::circuit_breaker::Preflight;
use crate::upstream::{Upstream, UpstreamPool};

/// Breaker gate layer bound to one upstream.
#[derive(Clone)]
pub struct BreakerGate {
    pool: Arc<UpstreamPool>,
    upstream: Upstream,
}

impl BreakerGate {
    /// Create a gate consulting `upstream`'s breaker in the shared pool.
    pub fn new(pool: Arc<UpstreamPool>, upstream: Upstream) -> Self {
        Self { pool, upstream }
    }
}

impl<S> Layer<S> for BreakerGate {
    type Service = BreakerGateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BreakerGateService {
            inner,
            pool: self.pool.clone(),
            upstream: self.upstream,
        }
    }
}

/// Breaker gate service wrapper.
#[derive(Clone)]
pub struct BreakerGateService<S> {
    inner: S,
    pool: Arc<UpstreamPool>,
    upstream: Upstream,
}

impl<S> Service<Request<Body>> for BreakerGateService<S>
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
        let pool = self.pool.clone();
        let upstream = self.upstream;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match pool.breaker(upstream).preflight().await {
                Preflight::Allow { probe } => {
                    if probe {
                        let ctx = req.request_context();
                        debug!(
                            request_id = %ctx.correlation_id,
                            upstream = %upstream,
                            "Request admitted as recovery probe"
                        );
                    }
                    inner.call(req).await
                }
                Preflight::Reject { retry_after } => {
                    let ctx = req.request_context();
                    Ok(GatewayError::CircuitOpen {
                        upstream,
                        retry_after,
                    }
                    .into_response_with(&ctx.correlation_id))
                }
            }
        })
    }
}
