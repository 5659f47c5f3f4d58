mod health;
mod proxy;

pub use health::{health_check, readiness_check};
pub use proxy::{login, proxy_notes, proxy_users};
