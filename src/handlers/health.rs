//! Health and readiness endpoints.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check with per-upstream circuit state
//! - `GET /ready` - Kubernetes-compatible readiness probe
//!
//! # Health vs Readiness
//!
//! - **Health** (`/health`): Always 200, reports "degraded" with circuit
//!   details while any upstream breaker is not closed
//! - **Readiness** (`/ready`): The gateway itself is stateless, so it is
//!   ready as soon as it is serving — open circuits mean a *backend* is
//!   unhealthy, not that this process should be restarted
//!
//! Both endpoints sit outside the rate-limit and auth layers so load
//! balancers and probes are never throttled or challenged.

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use tracing::instrument;

use crate::models::{HealthResponse, ReadyResponse, UpstreamHealth};
use crate::state::AppState;
use crate::upstream::Upstream;
use crate::upstream::circuit_breaker::CircuitState;

/// Health check endpoint.
///
/// Returns 200 OK with per-upstream circuit detail in the body.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "healthy",
///   "upstreams": [
///     {"name": "users", "circuit": "closed", "consecutive_failures": 0, "times_opened": 0},
///     {"name": "notes", "circuit": "open", "consecutive_failures": 0, "times_opened": 2}
///   ],
///   "version": "0.1.0",
///   "timestamp": "2026-01-15T10:30:00Z"
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut upstreams = Vec::with_capacity(2);
    let mut all_closed = true;

    for upstream in [Upstream::Users, Upstream::Notes] {
        let snapshot = state.upstreams.breaker(upstream).snapshot().await;
        all_closed &= snapshot.state == CircuitState::Closed;
        upstreams.push(UpstreamHealth {
            name: upstream.as_str(),
            circuit: snapshot.state.to_string(),
            consecutive_failures: snapshot.consecutive_failures,
            times_opened: snapshot.times_opened,
        });
    }

    Json(HealthResponse {
        status: if all_closed { "healthy" } else { "degraded" }.to_string(),
        upstreams,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    })
}

/// Readiness check endpoint for Kubernetes probes.
///
/// Returns 200 OK once the router is serving. Circuit state is deliberately
/// not part of readiness: restarting the gateway does not heal a backend.
#[instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Json<ReadyResponse> {
    Json(ReadyResponse {
        status: "ready",
        uptime_seconds: state.uptime_seconds(),
    })
}
