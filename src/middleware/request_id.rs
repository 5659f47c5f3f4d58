//! Correlation id middleware for distributed tracing.
//!
//! # Features
//!
//! - Reuses a non-empty inbound `X-Request-Id` header (trimmed) verbatim
//! - Generates a UUIDv4 for requests without one
//! - Stamps the id onto the request headers and a [`RequestContext`]
//!   extension for downstream components
//! - Adds `X-Request-Id` to every response, success or failure
//!
//! This layer sits outermost in the stack so that even requests rejected by
//! the rate limiter, breaker gate, or token verifier carry the correlation
//! id back to the caller. It never rejects a request.
//!
//! # Client Usage
//!
//! Clients can provide their own correlation id:
//!
//! ```bash
//! curl -H "X-Request-Id: my-correlation-id" http://localhost:8080/api/notes
//! ```
//!
//! The same id is returned in the response for correlation.

use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::http::header::HeaderValue;
use axum::http::{Request, Response};
use tower::{Layer, Service};
use tracing::{Span, debug};
use uuid::Uuid;

use crate::upstream::HEADER_REQUEST_ID;

/// Fallback header value when request ID parsing fails.
/// Using `from_static` avoids runtime parsing and is infallible.
static UNKNOWN_REQUEST_ID: HeaderValue = HeaderValue::from_static("unknown");

/// Per-request state created at the start of handling and discarded with the
/// response; never shared across requests.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Non-empty correlation id, inherited or freshly generated.
    pub correlation_id: String,
    /// When the gateway began handling this request.
    pub started_at: Instant,
}

impl RequestContext {
    /// Context for code paths that run before the stamper (fallback only).
    pub fn detached() -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            started_at: Instant::now(),
        }
    }
}

/// Correlation layer for the Tower middleware stack.
#[derive(Clone, Default)]
pub struct CorrelationLayer;

impl CorrelationLayer {
    /// Create a new correlation layer.
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for CorrelationLayer {
    type Service = CorrelationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationService { inner }
    }
}

/// Correlation service wrapper.
#[derive(Clone)]
pub struct CorrelationService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for CorrelationService<S>
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
        let correlation_id = inherit_or_generate(&req);

        // Stamp the request so handlers and the forwarder see one value.
        req.headers_mut().insert(
            HEADER_REQUEST_ID,
            correlation_id
                .parse()
                .unwrap_or_else(|_| UNKNOWN_REQUEST_ID.clone()),
        );
        req.extensions_mut().insert(RequestContext {
            correlation_id: correlation_id.clone(),
            started_at: Instant::now(),
        });

        Span::current().record("request_id", &correlation_id);
        debug!(request_id = %correlation_id, "Processing request");

        let mut inner = self.inner.clone();

        Box::pin(async move {
            let mut response = inner.call(req).await?;

            // The caller can always correlate, whatever happened inside.
            response.headers_mut().insert(
                HEADER_REQUEST_ID,
                correlation_id
                    .parse()
                    .unwrap_or_else(|_| UNKNOWN_REQUEST_ID.clone()),
            );

            Ok(response)
        })
    }
}

/// Reuse a non-empty trimmed inbound correlation id, or mint a new one.
fn inherit_or_generate<B>(req: &Request<B>) -> String {
    if let Some(header_value) = req.headers().get(HEADER_REQUEST_ID)
        && let Ok(value) = header_value.to_str()
    {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    Uuid::new_v4().to_string()
}

/// Extension trait to extract the request context from requests.
pub trait RequestContextExt {
    /// The stamped context, or a detached fallback if the stamper did not
    /// run (only possible for routes mounted outside the main stack).
    fn request_context(&self) -> RequestContext;
}

impl<B> RequestContextExt for Request<B> {
    fn request_context(&self) -> RequestContext {
        self.extensions()
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_else(RequestContext::detached)
    }
}
