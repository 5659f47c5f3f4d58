//! HTTP middleware for the gateway's admission and identity pipeline.
//!
//! This module provides the per-request pipeline as composable Tower layers:
//!
//! - **Correlation**: Reuse or mint a request id, stamp it on the request
//!   context and every response
//! - **Rate Limiting**: Fixed-window admission per scope and client address
//! - **Breaker Gate**: Per-upstream circuit check before any token work
//! - **Bearer Auth**: Signature-verified identity with generic 401s and
//!   brute-force throttling
//! - **Client IP**: Trusted-proxy-aware client identification shared by the
//!   limiting layers
//!
//! # Architecture
//!
//! ```text
//! Request → Correlation → Rate Limiter → Breaker Gate → Auth → Proxy
//!               ↓              ↓              ↓           ↓
//!        x-request-id    429 envelope   503 envelope  401 envelope
//! ```
//!
//! The correlation layer is outermost so every rejection still carries the
//! request id; the scoped layers are attached per route group in
//! `routes.rs`, which is also how the login route ends up rate-limited by
//! its own scope and exempt from token verification.

pub mod auth;
pub mod breaker;
pub mod ip;
pub mod rate_limit;
pub mod request_id;

pub use auth::BearerAuth;
pub use breaker::BreakerGate;
pub use ip::{TrustedProxies, UNKNOWN_IP, client_key};
pub use rate_limit::ScopedRateLimitLayer;
pub use request_id::{CorrelationLayer, RequestContext, RequestContextExt};
