//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible
//! defaults for development, except `JWT_SECRET` which must always be set.
//! In production, configure via environment variables or a `.env` file.
//!
//! # Security Configuration
//!
//! - `JWT_SECRET`: Shared secret for bearer-token signature verification
//!   (required — the gateway refuses to start without it)
//! - `TRUSTED_PROXIES`: CIDR ranges whose `X-Forwarded-For` headers are
//!   trusted for client identification
//!
//! # Resilience Tuning
//!
//! - `BREAKER_FAILURE_THRESHOLD`: Consecutive upstream failures before the
//!   circuit opens (default: 5)
//! - `BREAKER_OPEN_DURATION_MS`: Cooldown before a recovery probe (default: 30s)
//! - `UPSTREAM_TIMEOUT_MS`: Per-call upstream timeout (default: 5s)
//! - `RATE_LIMIT_{LOGIN,USERS,NOTES}_WINDOW_MS` / `..._MAX`: Per-scope
//!   fixed-window admission limits

use std::env;
use std::time::Duration;

use crate::error::{GatewayError, GatewayResult};
use crate::limiter::ScopeLimit;

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Gateway will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 8080)
    pub port: u16,

    // =========================================================================
    // Upstream Configuration
    // =========================================================================
    /// Base URL of the user/auth service, including its mount point.
    /// Inbound `/api/users/{rest}` is forwarded to `{users_service_url}/{rest}`.
    pub users_service_url: String,

    /// Base URL of the notes service, including its mount point.
    pub notes_service_url: String,

    /// Timeout for a single upstream call (default: 5 seconds).
    /// A call that exceeds this is classified as an upstream failure.
    pub upstream_timeout: Duration,

    /// Timeout for establishing an upstream connection (default: 2 seconds).
    pub upstream_connect_timeout: Duration,

    // =========================================================================
    // Circuit Breaker Configuration
    // =========================================================================
    /// Number of consecutive failures before opening a circuit (default: 5)
    pub breaker_failure_threshold: u32,

    /// How long a circuit stays open before admitting one recovery probe
    /// (default: 30s)
    pub breaker_open_duration: Duration,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Fixed-window limit for the login route (stricter sub-limit).
    pub login_limit: ScopeLimit,

    /// Fixed-window limit for the users route group (login excluded).
    pub users_limit: ScopeLimit,

    /// Fixed-window limit for the notes route group.
    pub notes_limit: ScopeLimit,

    /// How often expired rate-limit windows are swept (default: 60s).
    pub limiter_sweep_interval: Duration,

    // =========================================================================
    // Request Limits
    // =========================================================================
    /// Maximum request body size in bytes (default: 2MB).
    /// Bodies are buffered before forwarding; this bounds that buffer.
    pub max_request_body_size: usize,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Shared secret for bearer-token signature verification (required).
    pub jwt_secret: String,

    /// Comma-separated list of allowed CORS origins
    /// Use "*" to allow all origins (not recommended for production)
    pub cors_allowed_origins: Vec<String>,

    /// Trusted proxy CIDR ranges. `X-Forwarded-For` is only honored when the
    /// peer address falls inside one of these networks.
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Config` if `JWT_SECRET` is absent or any value
    /// fails to parse or validate.
    pub fn from_env() -> GatewayResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 8080)?,

            // Upstreams
            users_service_url: Self::parse_base_url(
                "USERS_SERVICE_URL",
                "http://127.0.0.1:7101/api/users",
            )?,
            notes_service_url: Self::parse_base_url(
                "NOTES_SERVICE_URL",
                "http://127.0.0.1:7102/api/notes",
            )?,
            upstream_timeout: Duration::from_millis(Self::parse_env("UPSTREAM_TIMEOUT_MS", 5000)?),
            upstream_connect_timeout: Duration::from_millis(Self::parse_env(
                "UPSTREAM_CONNECT_TIMEOUT_MS",
                2000,
            )?),

            // Circuit breaker
            breaker_failure_threshold: Self::parse_env("BREAKER_FAILURE_THRESHOLD", 5)?,
            breaker_open_duration: Duration::from_millis(Self::parse_env(
                "BREAKER_OPEN_DURATION_MS",
                30_000,
            )?),

            // Rate limiting
            login_limit: Self::parse_scope_limit("LOGIN", 60_000, 10)?,
            users_limit: Self::parse_scope_limit("USERS", 60_000, 120)?,
            notes_limit: Self::parse_scope_limit("NOTES", 60_000, 120)?,
            limiter_sweep_interval: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_SWEEP_INTERVAL_SECS",
                60,
            )?),

            // Request limits
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 2 * 1024 * 1024)?,

            // Security
            jwt_secret: env::var("JWT_SECRET")
                .map_err(|_| GatewayError::Config("JWT_SECRET must be set".to_string()))?,
            cors_allowed_origins: Self::parse_cors_origins(),
            trusted_proxies: Self::parse_trusted_proxies(),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Config` if validation fails.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.jwt_secret.is_empty() {
            return Err(GatewayError::Config(
                "JWT_SECRET must not be empty".to_string(),
            ));
        }

        if self.breaker_failure_threshold == 0 {
            return Err(GatewayError::Config(
                "BREAKER_FAILURE_THRESHOLD must be greater than 0".to_string(),
            ));
        }

        if self.breaker_open_duration.is_zero() {
            return Err(GatewayError::Config(
                "BREAKER_OPEN_DURATION_MS must be greater than 0".to_string(),
            ));
        }

        if self.upstream_timeout.is_zero() {
            return Err(GatewayError::Config(
                "UPSTREAM_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        for (name, limit) in [
            ("LOGIN", &self.login_limit),
            ("USERS", &self.users_limit),
            ("NOTES", &self.notes_limit),
        ] {
            if limit.window.is_zero() {
                return Err(GatewayError::Config(format!(
                    "RATE_LIMIT_{name}_WINDOW_MS must be greater than 0"
                )));
            }
            if limit.max == 0 {
                return Err(GatewayError::Config(format!(
                    "RATE_LIMIT_{name}_MAX must be greater than 0"
                )));
            }
        }

        if self.max_request_body_size == 0 {
            return Err(GatewayError::Config(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if trusted proxy validation is enabled.
    ///
    /// When enabled, `X-Forwarded-For` headers are only trusted if the
    /// connection originates from a configured trusted proxy network.
    pub fn proxy_validation_enabled(&self) -> bool {
        !self.trusted_proxies.is_empty()
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> GatewayResult<T>
    where
        T: std::str::FromStr + ToString,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .parse()
                .map_err(|e| GatewayError::Config(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse an upstream base URL, normalizing away any trailing slash so
    /// path rewriting can always join with a single `/`.
    fn parse_base_url(name: &str, default: &str) -> GatewayResult<String> {
        let raw = env::var(name).unwrap_or_else(|_| default.to_string());
        let trimmed = raw.trim_end_matches('/').to_string();
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(GatewayError::Config(format!(
                "Invalid {name}: expected an http(s) URL, got '{raw}'"
            )));
        }
        Ok(trimmed)
    }

    /// Parse one scope's `RATE_LIMIT_<NAME>_WINDOW_MS` / `RATE_LIMIT_<NAME>_MAX` pair.
    fn parse_scope_limit(
        name: &str,
        default_window_ms: u64,
        default_max: u32,
    ) -> GatewayResult<ScopeLimit> {
        let window_ms: u64 =
            Self::parse_env(&format!("RATE_LIMIT_{name}_WINDOW_MS"), default_window_ms)?;
        let max: u32 = Self::parse_env(&format!("RATE_LIMIT_{name}_MAX"), default_max)?;
        Ok(ScopeLimit {
            window: Duration::from_millis(window_ms),
            max,
        })
    }

    /// Parse CORS allowed origins from environment variable.
    fn parse_cors_origins() -> Vec<String> {
        env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Parse trusted proxy CIDR ranges from environment variable.
    ///
    /// Format: Comma-separated CIDR notation (e.g., "10.0.0.0/8,172.16.0.0/12")
    /// Default: Empty — only the peer socket address is trusted, never
    /// forwarded headers.
    fn parse_trusted_proxies() -> Vec<String> {
        env::var("TRUSTED_PROXIES")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 8080,
            // Upstreams
            users_service_url: "http://127.0.0.1:7101/api/users".to_string(),
            notes_service_url: "http://127.0.0.1:7102/api/notes".to_string(),
            upstream_timeout: Duration::from_secs(5),
            upstream_connect_timeout: Duration::from_secs(2),
            // Circuit breaker
            breaker_failure_threshold: 5,
            breaker_open_duration: Duration::from_secs(30),
            // Rate limiting
            login_limit: ScopeLimit {
                window: Duration::from_secs(60),
                max: 10,
            },
            users_limit: ScopeLimit {
                window: Duration::from_secs(60),
                max: 120,
            },
            notes_limit: ScopeLimit {
                window: Duration::from_secs(60),
                max: 120,
            },
            limiter_sweep_interval: Duration::from_secs(60),
            // Request limits
            max_request_body_size: 2 * 1024 * 1024,
            // Security
            jwt_secret: "dev-secret-change-me".to_string(),
            cors_allowed_origins: vec!["*".to_string()],
            trusted_proxies: vec![],
            // Observability
            log_level: "info".to_string(),
            metrics_port: 9090,
        }
    }
}
