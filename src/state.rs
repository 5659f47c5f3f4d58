//! Shared application state for Axum handlers.
//!
//! This module provides thread-safe, clonable state that is shared across
//! all request handlers and middleware layers. It owns the injectable
//! resilience components:
//!
//! - **Limiter**: The process-wide fixed-window rate limiter
//! - **Upstream pool**: The shared HTTP client plus one circuit breaker per
//!   upstream
//! - **Configuration**: Runtime configuration access
//!
//! Breaker and limiter state deliberately live here rather than in
//! module-level globals, so unit and integration tests can build isolated
//! gateways that never share admission state across test cases.
//!
//! # Structured Concurrency
//!
//! Background tasks are managed using `tokio_util::task::TaskTracker` and
//! `CancellationToken` for proper lifecycle management. Call `shutdown()`
//! to gracefully stop all background tasks before application exit.

use std::sync::Arc;
use std::time::Instant;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

use crate::config::Config;
use crate::error::GatewayResult;
use crate::limiter::FixedWindowLimiter;
use crate::middleware::TrustedProxies;
use crate::upstream::UpstreamPool;

/// Shared application state for Axum handlers.
///
/// This struct is cloned for each request handler. All internal data
/// is wrapped in `Arc` for efficient sharing.
///
/// # Lifecycle
///
/// A background window-sweeper task is spawned when the state is created.
/// Call `shutdown()` before dropping to ensure clean task termination:
///
/// ```rust,ignore
/// let state = AppState::new(config)?;
/// // ... serve ...
/// state.shutdown().await;  // Wait for background tasks to complete
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Fixed-window rate limiter shared by every scoped layer
    pub limiter: Arc<FixedWindowLimiter>,
    /// Upstream HTTP client plus per-upstream circuit breakers
    pub upstreams: Arc<UpstreamPool>,
    /// Trusted proxy networks for client identification
    pub trusted_proxies: Arc<TrustedProxies>,
    /// Timestamp when the application started
    pub started_at: Instant,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Create application state from configuration.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Config` if the upstream pool cannot be built.
    ///
    /// # Background Tasks
    ///
    /// Spawns the rate-limit window sweeper, which reclaims expired windows
    /// at `config.limiter_sweep_interval`. Call `shutdown()` to terminate it
    /// gracefully.
    pub fn new(config: Config) -> GatewayResult<Self> {
        let limiter = Arc::new(FixedWindowLimiter::new(
            config.login_limit,
            config.users_limit,
            config.notes_limit,
        ));
        let upstreams = Arc::new(UpstreamPool::new(&config)?);
        let trusted_proxies = Arc::new(TrustedProxies::new(&config.trusted_proxies));

        let state = Self {
            config: Arc::new(config),
            limiter,
            upstreams,
            trusted_proxies,
            started_at: Instant::now(),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        state.spawn_window_sweeper();

        Ok(state)
    }

    /// Spawn the background task reclaiming expired rate-limit windows.
    ///
    /// Admission correctness does not depend on this — `admit` resets stale
    /// windows in place — it only keeps memory bounded for clients that
    /// never return.
    fn spawn_window_sweeper(&self) {
        let limiter = self.limiter.clone();
        let sweep_interval = self.config.limiter_sweep_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(sweep_interval);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased; // Check cancellation first

                    _ = cancel.cancelled() => {
                        debug!("Window sweeper received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let reclaimed = limiter.sweep();
                        if reclaimed > 0 {
                            trace!(reclaimed, "Swept expired rate-limit windows");
                        }
                    }
                }
            }

            debug!("Window sweeper shutting down");
        });
    }

    /// Gracefully shutdown all background tasks.
    ///
    /// This method:
    /// 1. Signals all tasks to stop via cancellation token
    /// 2. Closes the task tracker (prevents new tasks)
    /// 3. Waits for all tasks to complete
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        // Signal all tasks to stop
        self.cancellation_token.cancel();

        // Close the tracker - no new tasks can be spawned
        self.task_tracker.close();

        // Wait for all tasks to complete
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
