//! Gateway-wide error types and the single JSON error envelope.
//!
//! Every failure path in the gateway — admission rejections, authentication
//! failures, upstream trouble, routing misses, internal faults — is rendered
//! through one envelope shape so clients never have to parse more than:
//!
//! ```json
//! {
//!   "error": {
//!     "code": "CIRCUIT_OPEN",
//!     "message": "Upstream is temporarily unavailable. Please try again later.",
//!     "upstream": "users",
//!     "retryAfterSeconds": 12
//!   },
//!   "requestId": "0b54..."
//! }
//! ```
//!
//! Rendering policy follows the error taxonomy:
//!
//! - Admission rejections (429/503) are steady-state conditions, logged as
//!   warnings with their retry hint.
//! - Authentication failures are logged with the precise reason server-side
//!   but rendered as a generic 401 — the client never learns *why*
//!   verification failed.
//! - Upstream failures are translated to a normalized 502; raw transport
//!   errors never leak to the wire.
//! - Internal errors are the only class logged at `error` level, with full
//!   detail keyed by the correlation id and a generic message on the wire.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::upstream::Upstream;

/// Classified gateway failure, carried between components until the edge
/// renders it.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Missing, malformed, or unverifiable bearer token.
    #[error("authentication failed")]
    Unauthorized,

    /// A rate-limit scope rejected the request.
    #[error("rate limit exceeded for scope '{scope}'")]
    RateLimited {
        scope: &'static str,
        retry_after: Duration,
        limit: u32,
    },

    /// The upstream's circuit breaker is open; the call was never attempted.
    #[error("circuit open for upstream '{upstream}'")]
    CircuitOpen {
        upstream: Upstream,
        retry_after: Duration,
    },

    /// The upstream call failed: connection error, timeout, or a 5xx reply.
    #[error("upstream '{upstream}' request failed: {reason}")]
    Upstream { upstream: Upstream, reason: String },

    /// No route matches the request path.
    #[error("no route matches the request path")]
    NotFound,

    /// Invalid or missing configuration (startup only).
    #[error("configuration error: {0}")]
    Config(String),

    /// Programming or state error inside the gateway.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias for fallible gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Machine-readable error codes exposed in the envelope.
mod codes {
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const RATE_LIMITED: &str = "RATE_LIMITED";
    pub const CIRCUIT_OPEN: &str = "CIRCUIT_OPEN";
    pub const UPSTREAM_ERROR: &str = "UPSTREAM_ERROR";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Inner `error` object of the envelope.
#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    upstream: Option<&'static str>,
    #[serde(rename = "retryAfterSeconds", skip_serializing_if = "Option::is_none")]
    retry_after_seconds: Option<u64>,
}

/// The single failure envelope every error path renders.
#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
    #[serde(rename = "requestId")]
    request_id: String,
}

/// Convert a wait duration into whole seconds for `Retry-After`, rounding
/// any fraction up and never telling the client to retry immediately.
pub fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

impl GatewayError {
    /// Render this error as the wire envelope, tagged with the request's
    /// correlation id. This is the only place failures become HTTP.
    pub fn into_response_with(self, request_id: &str) -> Response {
        let (status, body, retry_header) = match &self {
            GatewayError::Unauthorized => {
                // Reason stays server-side; logged by the auth middleware.
                (
                    StatusCode::UNAUTHORIZED,
                    ErrorBody {
                        code: codes::UNAUTHORIZED,
                        message: "Authentication required.",
                        scope: None,
                        upstream: None,
                        retry_after_seconds: None,
                    },
                    None,
                )
            }
            GatewayError::RateLimited {
                scope, retry_after, ..
            } => {
                let secs = retry_after_secs(*retry_after);
                tracing::warn!(
                    request_id,
                    scope = *scope,
                    retry_after_secs = secs,
                    "Rate limit exceeded"
                );
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    ErrorBody {
                        code: codes::RATE_LIMITED,
                        message: "Rate limit exceeded. Please retry later.",
                        scope: Some(*scope),
                        upstream: None,
                        retry_after_seconds: Some(secs),
                    },
                    Some(secs),
                )
            }
            GatewayError::CircuitOpen {
                upstream,
                retry_after,
            } => {
                let secs = retry_after_secs(*retry_after);
                tracing::warn!(
                    request_id,
                    upstream = %upstream,
                    retry_after_secs = secs,
                    "Circuit open, rejecting without upstream call"
                );
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorBody {
                        code: codes::CIRCUIT_OPEN,
                        message: "Upstream is temporarily unavailable. Please try again later.",
                        scope: None,
                        upstream: Some(upstream.as_str()),
                        retry_after_seconds: Some(secs),
                    },
                    Some(secs),
                )
            }
            GatewayError::Upstream { upstream, reason } => {
                tracing::warn!(
                    request_id,
                    upstream = %upstream,
                    reason = %reason,
                    "Upstream request failed"
                );
                (
                    StatusCode::BAD_GATEWAY,
                    ErrorBody {
                        code: codes::UPSTREAM_ERROR,
                        message: "Upstream request failed. Please try again.",
                        scope: None,
                        upstream: Some(upstream.as_str()),
                        retry_after_seconds: None,
                    },
                    None,
                )
            }
            GatewayError::NotFound => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    code: codes::NOT_FOUND,
                    message: "No route matches the requested path.",
                    scope: None,
                    upstream: None,
                    retry_after_seconds: None,
                },
                None,
            ),
            GatewayError::Config(detail) | GatewayError::Internal(detail) => {
                tracing::error!(request_id, detail = %detail, "Internal gateway error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        code: codes::INTERNAL_ERROR,
                        message: "An internal error occurred. Please try again later.",
                        scope: None,
                        upstream: None,
                        retry_after_seconds: None,
                    },
                    None,
                )
            }
        };

        let envelope = ErrorEnvelope {
            error: body,
            request_id: request_id.to_string(),
        };

        match retry_header {
            Some(secs) => (
                status,
                [("Retry-After", secs.to_string())],
                axum::Json(envelope),
            )
                .into_response(),
            None => (status, axum::Json(envelope)).into_response(),
        }
    }
}
