//! Circuit breaker guarding one upstream service.
//!
//! The breaker prevents request pile-up against a failing upstream by
//! rejecting traffic for a cooldown period, then probing recovery with a
//! single trial request.
//!
//! # States
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  ┌─────────┐  consecutive failures ≥ threshold   ┌─────────┐      │
//! │  │  Closed │ ──────────────────────────────────► │  Open   │      │
//! │  │ (Normal)│                                     │ (Reject │      │
//! │  └────▲────┘                                     │  fast)  │      │
//! │       │                                          └────┬────┘      │
//! │       │ probe success                                 │ open      │
//! │       │                                               │ duration  │
//! │       │                                               ▼ elapses   │
//! │       │                                       ┌───────────────┐   │
//! │       └────────────────────────────────────── │   HalfOpen    │   │
//! │                                               │ (exactly one  │   │
//! │                          probe failure        │  probe flows) │   │
//! │                  ┌──────────────────────────  └───────────────┘   │
//! │                  ▼                                                │
//! │             ┌─────────┐   fresh full-duration window              │
//! │             │  Open   │                                           │
//! │             └─────────┘                                           │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Semantics
//!
//! - The failure counter only means anything while Closed; it is reset the
//!   moment the circuit opens.
//! - The first preflight after the open duration elapses becomes the single
//!   recovery probe; every other request keeps getting rejected until the
//!   probe settles.
//! - A failed probe reopens the circuit for a **full** fresh duration — it
//!   does not merely count toward the threshold again. A probe that times
//!   out, or whose task is cancelled before the upstream answered, is
//!   recorded as a failed probe (see the forwarder's outcome guard).
//! - One probe success closes the circuit and clears the counters.
//!
//! All transitions happen under a write lock, so an Open transition can
//! never be lost between two racing failures; routing reads use the cheap
//! read path and may be momentarily stale, which is acceptable.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::metrics;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - all requests pass through.
    Closed,
    /// Failing fast - all requests are rejected immediately.
    Open,
    /// A single recovery probe is in flight; everything else is rejected.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for the circuit breaker.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// How long to stay open before admitting the recovery probe.
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
        }
    }
}

/// Outcome of asking the breaker whether a request may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preflight {
    /// Proceed; `probe` marks the single recovery trial.
    Allow { probe: bool },
    /// Reject without touching the upstream; retry once the window passes.
    Reject { retry_after: Duration },
}

/// Mutable breaker state, guarded by one lock so transitions are atomic.
struct Inner {
    state: CircuitState,
    /// When the circuit last opened; `None` while closed and never opened.
    opened_at: Option<Instant>,
    /// Consecutive failures observed while Closed; reset on open and on
    /// success.
    consecutive_failures: u32,
}

/// Point-in-time view of a breaker, for health reporting and tests.
#[derive(Debug, Clone, Copy)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub times_opened: u32,
}

/// Thread-safe circuit breaker, one instance per upstream for the lifetime
/// of the process.
pub struct CircuitBreaker {
    /// Upstream label for logs and metrics.
    label: &'static str,
    /// Configuration parameters.
    config: CircuitBreakerConfig,
    /// Internal state protected by RwLock.
    inner: RwLock<Inner>,
    /// Total number of times the circuit has been opened (for metrics).
    times_opened: AtomicU32,
    /// Total number of requests rejected while open (for metrics).
    requests_rejected: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker for the labeled upstream.
    pub fn new(label: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            label,
            config,
            inner: RwLock::new(Inner {
                state: CircuitState::Closed,
                opened_at: None,
                consecutive_failures: 0,
            }),
            times_opened: AtomicU32::new(0),
            requests_rejected: AtomicU64::new(0),
        }
    }

    /// Decide whether a request may be sent to the upstream.
    ///
    /// - **Closed**: allowed.
    /// - **Open**, duration not yet elapsed: rejected with the time left.
    /// - **Open**, duration elapsed: the calling request becomes the single
    ///   recovery probe (transition to HalfOpen under the write lock admits
    ///   exactly one caller).
    /// - **HalfOpen**: rejected — a probe is already in flight.
    pub async fn preflight(&self) -> Preflight {
        // Cheap read path for the common cases.
        {
            let inner = self.inner.read().await;
            match inner.state {
                CircuitState::Closed => return Preflight::Allow { probe: false },
                CircuitState::HalfOpen => return self.reject(&inner),
                CircuitState::Open => {
                    if let Some(opened_at) = inner.opened_at
                        && opened_at.elapsed() < self.config.open_duration
                    {
                        return self.reject(&inner);
                    }
                    // Cooldown elapsed - contend for the probe slot below.
                }
            }
        }

        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Open => {
                if let Some(opened_at) = inner.opened_at
                    && opened_at.elapsed() >= self.config.open_duration
                {
                    inner.state = CircuitState::HalfOpen;
                    metrics::set_breaker_state(self.label, CircuitState::HalfOpen);
                    info!(
                        upstream = self.label,
                        "Circuit cooldown elapsed, admitting one recovery probe"
                    );
                    return Preflight::Allow { probe: true };
                }
                self.reject(&inner)
            }
            // Another task won the probe slot between our read and write.
            CircuitState::HalfOpen => self.reject(&inner),
            CircuitState::Closed => Preflight::Allow { probe: false },
        }
    }

    fn reject(&self, inner: &Inner) -> Preflight {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
        metrics::record_breaker_rejection(self.label);
        let retry_after = inner
            .opened_at
            .map(|at| self.config.open_duration.saturating_sub(at.elapsed()))
            .unwrap_or_default();
        Preflight::Reject { retry_after }
    }

    /// Record a successful upstream outcome (any reply below 500).
    pub async fn record_success(&self) {
        let mut inner = self.inner.write().await;

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.opened_at = None;
                inner.consecutive_failures = 0;
                metrics::set_breaker_state(self.label, CircuitState::Closed);
                info!(
                    upstream = self.label,
                    "Recovery probe succeeded, circuit closed"
                );
            }
            CircuitState::Open => {
                // A request admitted before the circuit opened settled late.
                debug!(
                    upstream = self.label,
                    "Ignoring straggler success while circuit is open"
                );
            }
        }
    }

    /// Record a failed upstream outcome (connect error, timeout, or >= 500).
    pub async fn record_failure(&self) {
        let mut inner = self.inner.write().await;

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                debug!(
                    upstream = self.label,
                    consecutive_failures = inner.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    "Upstream failure recorded"
                );

                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.open(&mut inner, "consecutive failures reached threshold");
                }
            }
            CircuitState::HalfOpen => {
                // Failed probe: full fresh window, not another counter tick.
                self.open(&mut inner, "recovery probe failed");
            }
            CircuitState::Open => {
                // Straggler from before the transition; the window is not
                // extended and the transition cannot be lost.
                debug!(
                    upstream = self.label,
                    "Ignoring straggler failure while circuit is open"
                );
            }
        }
    }

    fn open(&self, inner: &mut Inner, reason: &'static str) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.consecutive_failures = 0;
        self.times_opened.fetch_add(1, Ordering::Relaxed);
        metrics::record_breaker_open(self.label);
        metrics::set_breaker_state(self.label, CircuitState::Open);
        warn!(
            upstream = self.label,
            open_duration = ?self.config.open_duration,
            reason,
            "Circuit opened"
        );
    }

    /// Upstream label this breaker guards.
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Point-in-time view for health reporting.
    pub async fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.read().await;
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            times_opened: self.times_opened.load(Ordering::Relaxed),
        }
    }

    /// Number of requests rejected while the circuit was open or probing.
    pub fn requests_rejected(&self) -> u64 {
        self.requests_rejected.load(Ordering::Relaxed)
    }
}
