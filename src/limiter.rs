//! Fixed-window rate limiting keyed by (scope, client).
//!
//! # Algorithm
//!
//! Plain fixed-window counting: the first request from a client in a scope
//! opens a window with `count = 1`; subsequent requests increment the count
//! until the window's duration elapses, after which the next request opens a
//! fresh window. A request is admitted while `count <= max` and rejected
//! beyond that, with a retry hint equal to the ceiling of the time remaining
//! in the window.
//!
//! A request landing exactly on a window boundary is resolved by strict
//! timestamp comparison (`elapsed >= window` starts a new window), never by
//! rounding — it falls into whichever window opened first chronologically.
//!
//! # Scopes
//!
//! Three scopes exist, each with an independently configured window and
//! maximum: `login` (a stricter sub-limit applied only to the login route),
//! `users`, and `notes`. The login route is structurally excluded from the
//! `users` scope — its route group simply never carries the `users`-scope
//! layer — so clean clients are not double-penalized.
//!
//! # Concurrency
//!
//! Windows live in a mutex-guarded map; `admit` is a short, non-async
//! critical section (one hash lookup and a counter bump), which keeps the
//! read-modify-write atomic so two concurrent increments can never both
//! observe the same count. Expired windows are reclaimed by a background
//! sweep (see `AppState`) and recreated lazily on the next request.
//!
//! `admit` never fails: the outcome is a pure classification.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Named bucket of routes sharing one limit configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// The login route only — a stricter sub-limit in front of `users`.
    Login,
    /// The users route group (login excluded).
    Users,
    /// The notes route group.
    Notes,
}

impl Scope {
    /// Wire/label representation, used in envelopes, logs, and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Login => "login",
            Scope::Users => "users",
            Scope::Notes => "notes",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scope's window duration and admission ceiling.
#[derive(Debug, Clone, Copy)]
pub struct ScopeLimit {
    /// Window duration.
    pub window: Duration,
    /// Maximum requests admitted per window per client.
    pub max: u32,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Request admitted; `remaining` is the headroom left in this window.
    Admitted { remaining: u32 },
    /// Request rejected; retry after the window rolls over.
    Rejected { retry_after: Duration },
}

impl Admission {
    /// Helper to check if admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

/// A single client's counting window.
#[derive(Debug)]
struct Window {
    started_at: Instant,
    count: u32,
}

/// Fixed-window limiter owning every (scope, client) window.
///
/// One instance per process, injected into the route layers — no global
/// state, so tests can run isolated limiters side by side.
pub struct FixedWindowLimiter {
    login: ScopeLimit,
    users: ScopeLimit,
    notes: ScopeLimit,
    windows: Mutex<HashMap<(Scope, String), Window>>,
}

impl FixedWindowLimiter {
    /// Create a limiter with one limit per scope.
    pub fn new(login: ScopeLimit, users: ScopeLimit, notes: ScopeLimit) -> Self {
        Self {
            login,
            users,
            notes,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// The configured limit for a scope.
    pub fn limit(&self, scope: Scope) -> ScopeLimit {
        match scope {
            Scope::Login => self.login,
            Scope::Users => self.users,
            Scope::Notes => self.notes,
        }
    }

    /// Classify one request from `client_key` against `scope`.
    ///
    /// Opens a new window when none exists or the current one has expired;
    /// otherwise counts against the current window.
    pub fn admit(&self, scope: Scope, client_key: &str) -> Admission {
        let limit = self.limit(scope);
        let now = Instant::now();

        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let window = windows
            .entry((scope, client_key.to_string()))
            .or_insert(Window {
                started_at: now,
                count: 0,
            });

        let elapsed = now.duration_since(window.started_at);
        if elapsed >= limit.window {
            // Strict boundary: the old window is over, start a new one.
            window.started_at = now;
            window.count = 0;
        }

        window.count = window.count.saturating_add(1);
        if window.count <= limit.max {
            Admission::Admitted {
                remaining: limit.max - window.count,
            }
        } else {
            let elapsed = now.duration_since(window.started_at);
            Admission::Rejected {
                retry_after: limit.window.saturating_sub(elapsed),
            }
        }
    }

    /// Drop every window whose duration has fully elapsed.
    ///
    /// Returns the number of windows reclaimed. Correctness does not depend
    /// on this — `admit` resets expired windows in place — it only bounds
    /// memory for clients that never come back.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let before = windows.len();
        windows.retain(|(scope, _), window| {
            let limit = match scope {
                Scope::Login => self.login,
                Scope::Users => self.users,
                Scope::Notes => self.notes,
            };
            now.duration_since(window.started_at) < limit.window
        });
        before - windows.len()
    }

    /// Number of live windows (diagnostics and tests).
    pub fn tracked_windows(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
