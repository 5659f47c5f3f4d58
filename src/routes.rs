//! Application routing configuration with middleware stack.
//!
//! # Pipeline (applied in order)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Correlation    │ ← stamps X-Request-Id on request and response
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← per route group scope; 429 if exceeded
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │   Breaker Gate   │ ← per upstream; 503 while the circuit is open
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │   Bearer Auth    │ ← 401 if unverifiable (login group skips this)
//! └────────┬─────────┘
//!          │
//!          ▼
//!    Proxy handler
//! ```
//!
//! # Route Groups
//!
//! - `/health`, `/ready` - probes; no limits, no auth
//! - `/api/users/login` - `login` scope, users breaker, **no auth** — and
//!   deliberately absent from the `users` scope so clean clients are not
//!   double-counted
//! - `/api/users[/*]` - `users` scope, users breaker, auth
//! - `/api/notes[/*]` - `notes` scope, notes breaker, auth
//!
//! Anything else falls through to the normalized 404 envelope.

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use axum::routing::{any, get};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::GatewayError;
use crate::handlers;
use crate::limiter::Scope;
use crate::middleware::{
    BearerAuth, BreakerGate, CorrelationLayer, RequestContextExt, ScopedRateLimitLayer,
};
use crate::state::AppState;
use crate::upstream::Upstream;

/// Build the application router with all routes and middleware configured.
///
/// # Arguments
///
/// * `state` - Application state containing config, limiter, and upstreams
///
/// # Returns
///
/// Fully configured Axum router ready to be served.
pub fn build_router(state: AppState) -> Router {
    let config = &state.config;

    let cors = build_cors_layer(&config.cors_allowed_origins);
    let auth = BearerAuth::new(&config.jwt_secret, state.trusted_proxies.clone());
    let scoped = |scope: Scope| {
        ScopedRateLimitLayer::new(state.limiter.clone(), scope, state.trusted_proxies.clone())
    };

    // Login: own stricter scope, users breaker, no token verification.
    let login_routes = Router::new()
        .route("/api/users/login", any(handlers::login))
        .route_layer(BreakerGate::new(state.upstreams.clone(), Upstream::Users))
        .route_layer(scoped(Scope::Login));

    // Users: broad scope (login excluded by construction), users breaker, auth.
    let users_routes = Router::new()
        .route("/api/users", any(handlers::proxy_users))
        .route("/api/users/{*path}", any(handlers::proxy_users))
        .route_layer(auth.clone())
        .route_layer(BreakerGate::new(state.upstreams.clone(), Upstream::Users))
        .route_layer(scoped(Scope::Users));

    let notes_routes = Router::new()
        .route("/api/notes", any(handlers::proxy_notes))
        .route("/api/notes/{*path}", any(handlers::proxy_notes))
        .route_layer(auth)
        .route_layer(BreakerGate::new(state.upstreams.clone(), Upstream::Notes))
        .route_layer(scoped(Scope::Notes));

    info!(
        login_max = config.login_limit.max,
        users_max = config.users_limit.max,
        notes_max = config.notes_limit.max,
        breaker_threshold = config.breaker_failure_threshold,
        "Gateway routes configured"
    );

    Router::new()
        // Probes stay outside every admission layer.
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .merge(login_routes)
        .merge(users_routes)
        .merge(notes_routes)
        .fallback(not_found)
        // Outer layers run first: correlation wraps everything so even
        // rejected requests carry their id (layers apply bottom-up).
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(CorrelationLayer::new())
        .with_state(state)
}

/// Fallback for paths outside the gateway's surface: normalized 404.
async fn not_found(req: Request<Body>) -> Response {
    let ctx = req.request_context();
    GatewayError::NotFound.into_response_with(&ctx.correlation_id)
}

/// Build CORS layer from configuration.
///
/// # Arguments
///
/// * `allowed_origins` - List of allowed origins, or `["*"]` for any origin
///
/// # Security Note
///
/// Using `*` (any origin) is convenient for development but should be
/// avoided in production. Specify explicit origins instead.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    // Check if we should allow any origin
    let allow_any = allowed_origins.iter().any(|o| o == "*");

    if allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        // Parse specific origins
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
