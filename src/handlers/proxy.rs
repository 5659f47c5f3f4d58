//! Proxy handlers for the three proxied route groups.
//!
//! By the time a request reaches one of these handlers it has already been
//! stamped, admitted by its rate-limit scope, passed the upstream's breaker
//! gate, and — on protected routes — carries a verified identity extension.
//! What remains is the single upstream attempt and outcome accounting.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::response::Response;
use tracing::info;

use crate::metrics;
use crate::middleware::RequestContextExt;
use crate::state::AppState;
use crate::token::AuthenticatedIdentity;
use crate::upstream::Upstream;

/// Proxy `/api/users/login` to the user service (unauthenticated route).
pub async fn login(State(state): State<AppState>, req: Request<Body>) -> Response {
    proxy(state, Upstream::Users, req).await
}

/// Proxy `/api/users[/*]` to the user service.
pub async fn proxy_users(State(state): State<AppState>, req: Request<Body>) -> Response {
    proxy(state, Upstream::Users, req).await
}

/// Proxy `/api/notes[/*]` to the notes service.
pub async fn proxy_notes(State(state): State<AppState>, req: Request<Body>) -> Response {
    proxy(state, Upstream::Notes, req).await
}

async fn proxy(state: AppState, upstream: Upstream, req: Request<Body>) -> Response {
    let ctx = req.request_context();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let identity = req.extensions().get::<AuthenticatedIdentity>().cloned();

    let result = state
        .upstreams
        .forward(upstream, &ctx, identity.as_ref(), req)
        .await;
    let elapsed = ctx.started_at.elapsed();

    match result {
        Ok(response) => {
            metrics::record_proxy_duration(upstream.as_str(), "relayed", elapsed.as_secs_f64());
            info!(
                request_id = %ctx.correlation_id,
                method = %method,
                path = %path,
                upstream = %upstream,
                status = response.status().as_u16(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Relayed upstream response"
            );
            response
        }
        Err(error) => {
            metrics::record_proxy_duration(upstream.as_str(), "error", elapsed.as_secs_f64());
            error.into_response_with(&ctx.correlation_id)
        }
    }
}
