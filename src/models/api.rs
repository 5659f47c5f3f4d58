use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Gateway health status ("healthy" while all circuits are closed,
    /// "degraded" otherwise).
    pub status: String,
    /// Per-upstream circuit state.
    pub upstreams: Vec<UpstreamHealth>,
    /// Service version
    pub version: String,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
}

/// One upstream's circuit view inside the health response.
#[derive(Debug, Serialize)]
pub struct UpstreamHealth {
    /// Upstream name ("users", "notes").
    pub name: &'static str,
    /// Circuit state ("closed", "open", "half-open").
    pub circuit: String,
    /// Consecutive failures observed while the circuit is closed.
    pub consecutive_failures: u32,
    /// How many times this circuit has opened since startup.
    pub times_opened: u32,
}

/// Readiness probe response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Always "ready" when this response is returned at all.
    pub status: &'static str,
    /// Gateway uptime in seconds.
    pub uptime_seconds: u64,
}
