//! # Edge Gateway
//!
//! A resilient edge gateway in front of the user/auth and notes services,
//! featuring:
//!
//! - **Resilience**: Per-upstream circuit breaking with single-probe recovery
//! - **Protection**: Per-route fixed-window rate limiting keyed by client
//! - **Security**: Stateless bearer-token verification with trusted identity
//!   header injection
//! - **Observability**: Correlation ids, structured logging, Prometheus
//!   metrics, health endpoints
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Correlation → Rate Limit → Breaker → Auth)     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Proxy handlers (login, users, notes) + health probes       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  UpstreamPool (reqwest client + circuit breakers)           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  User service            │            Notes service         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edge_gateway::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config)?;
//!     let app = build_router(state);
//!
//!     // Serve the router...
//!     Ok(())
//! }
//! ```
//!
//! ## Security Configuration
//!
//! The token secret is mandatory:
//! ```bash
//! JWT_SECRET=change-me cargo run
//! ```
//!
//! Tune the resilience core:
//! ```bash
//! BREAKER_FAILURE_THRESHOLD=5 BREAKER_OPEN_DURATION_MS=30000 \
//! RATE_LIMIT_LOGIN_MAX=10 UPSTREAM_TIMEOUT_MS=5000 cargo run
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod limiter;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod token;
pub mod upstream;

// Re-exports for convenience
pub use config::Config;
pub use error::{GatewayError, GatewayResult};
pub use limiter::{Admission, FixedWindowLimiter, Scope};
pub use routes::build_router;
pub use state::AppState;
pub use upstream::{Upstream, UpstreamPool};
