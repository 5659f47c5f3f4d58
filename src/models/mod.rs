mod api;

pub use api::{HealthResponse, ReadyResponse, UpstreamHealth};
