//! In-memory rate limiting for AI summary requests.
//!
//! DESIGN
//! ======
//! Sliding-window counters: one `VecDeque<Instant>` per employee plus one
//! global deque, all behind a single `std::sync::Mutex`. The lock is never
//! held across an await.
//!
//! Defaults: 5 summaries per employee per minute, 30 per minute overall.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::http::StatusCode;

use crate::config::env_parse;
use crate::error::ErrorCode;

const DEFAULT_PER_EMPLOYEE_LIMIT: usize = 5;
const DEFAULT_PER_EMPLOYEE_WINDOW_SECS: u64 = 60;
const DEFAULT_GLOBAL_LIMIT: usize = 30;
const DEFAULT_GLOBAL_WINDOW_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub per_employee_limit: usize,
    pub per_employee_window: Duration,
    pub global_limit: usize,
    pub global_window: Duration,
}

impl RateLimitConfig {
    /// `RATE_LIMIT_PER_EMPLOYEE`, `RATE_LIMIT_PER_EMPLOYEE_WINDOW_SECS`,
    /// `RATE_LIMIT_GLOBAL`, `RATE_LIMIT_GLOBAL_WINDOW_SECS`.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            per_employee_limit: env_parse("RATE_LIMIT_PER_EMPLOYEE", DEFAULT_PER_EMPLOYEE_LIMIT),
            per_employee_window: Duration::from_secs(env_parse(
                "RATE_LIMIT_PER_EMPLOYEE_WINDOW_SECS",
                DEFAULT_PER_EMPLOYEE_WINDOW_SECS,
            )),
            global_limit: env_parse("RATE_LIMIT_GLOBAL", DEFAULT_GLOBAL_LIMIT),
            global_window: Duration::from_secs(env_parse("RATE_LIMIT_GLOBAL_WINDOW_SECS", DEFAULT_GLOBAL_WINDOW_SECS)),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_employee_limit: DEFAULT_PER_EMPLOYEE_LIMIT,
            per_employee_window: Duration::from_secs(DEFAULT_PER_EMPLOYEE_WINDOW_SECS),
            global_limit: DEFAULT_GLOBAL_LIMIT,
            global_window: Duration::from_secs(DEFAULT_GLOBAL_WINDOW_SECS),
        }
    }
}

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("too many summaries for {employee} (max {limit} per {window_secs}s)")]
    PerEmployee { employee: String, limit: usize, window_secs: u64 },
    #[error("summary service busy (max {limit} per {window_secs}s)")]
    Global { limit: usize, window_secs: u64 },
}

impl ErrorCode for RateLimitError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::PerEmployee { .. } => "E_RATE_LIMIT_EMPLOYEE",
            Self::Global { .. } => "E_RATE_LIMIT_GLOBAL",
        }
    }

    fn http_status(&self) -> StatusCode {
        StatusCode::TOO_MANY_REQUESTS
    }

    fn retryable(&self) -> bool {
        true
    }
}

// =============================================================================
// RATE LIMITER
// =============================================================================

#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<Windows>>,
    config: RateLimitConfig,
}

#[derive(Default)]
struct Windows {
    per_employee: HashMap<String, VecDeque<Instant>>,
    global: VecDeque<Instant>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self { inner: Arc::new(Mutex::new(Windows::default())), config }
    }

    #[must_use]
    pub fn from_env() -> Self {
        Self::new(RateLimitConfig::from_env())
    }

    /// Check both windows, then record the request.
    ///
    /// # Errors
    ///
    /// Returns the first exceeded limit; nothing is recorded in that case.
    pub fn check_and_record(&self, employee: &str) -> Result<(), RateLimitError> {
        self.check_and_record_at(employee, Instant::now())
    }

    fn check_and_record_at(&self, employee: &str, now: Instant) -> Result<(), RateLimitError> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let windows = &mut *guard;
        let cfg = self.config;

        prune(&mut windows.global, now, cfg.global_window);
        if windows.global.len() >= cfg.global_limit {
            return Err(RateLimitError::Global { limit: cfg.global_limit, window_secs: cfg.global_window.as_secs() });
        }

        let mine = windows.per_employee.entry(employee.to_owned()).or_default();
        prune(mine, now, cfg.per_employee_window);
        if mine.len() >= cfg.per_employee_limit {
            return Err(RateLimitError::PerEmployee {
                employee: employee.to_owned(),
                limit: cfg.per_employee_limit,
                window_secs: cfg.per_employee_window.as_secs(),
            });
        }

        mine.push_back(now);
        windows.global.push_back(now);
        Ok(())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

fn prune(deque: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while deque.front().is_some_and(|&front| now.duration_since(front) > window) {
        deque.pop_front();
    }
}

#[cfg(test)]
#[path = "rate_limit_test.rs"]
mod tests;
