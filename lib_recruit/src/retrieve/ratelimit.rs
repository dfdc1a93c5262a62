//! Handle the API's rate limiting.
//!
//! Two budgets are enforced together. Locally, at most `period_max` requests
//! may have been issued inside the policy window. Remotely, the server reports
//! its own bucket through the `RateLimit-*` headers, and a request is refused
//! once the reported `remaining` drops to one, until the reported `reset` has
//! passed since those headers arrived. Until the first response has been
//! observed the window is unknown and nothing is refused.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use http::HeaderMap;
use serde::Serialize;

use crate::error::RequestError;

/// Eviction horizon for the local log before any policy window is known.
const FALLBACK_WINDOW: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct RateState {
    limit: Option<usize>,
    window: Option<Duration>,
    remaining: Option<usize>,
    reset: Option<Duration>,
    observed_at: Option<Instant>,
    timestamps: VecDeque<Instant>,
}

impl RateState {
    /// Time left until the server bucket refills, if it is still drained.
    fn server_wait(&self, now: Instant) -> Option<Duration> {
        if !self.remaining.is_some_and(|r| r <= 1) {
            return None;
        }
        let reset = self.reset.unwrap_or_default();
        let elapsed = self
            .observed_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or_default();
        (elapsed < reset).then(|| reset - elapsed)
    }
}

/// Point-in-time view of the limiter, for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateSnapshot {
    pub limit: Option<usize>,
    pub window_secs: Option<u64>,
    pub remaining: Option<usize>,
    pub reset_secs: Option<u64>,
    pub in_window: usize,
}

#[derive(Debug)]
pub struct RateLimiter {
    period_max: usize,
    state: Mutex<RateState>,
}

impl RateLimiter {
    pub fn new(period_max: usize) -> Self {
        Self {
            period_max: period_max.max(1),
            state: Mutex::new(RateState::default()),
        }
    }

    /// Reserves a slot for one request, or explains how long to wait.
    pub fn acquire(&self) -> Result<(), RequestError> {
        self.acquire_at(Instant::now())
    }

    /// Check and reservation happen under one lock, so concurrent callers can
    /// never both take the last slot.
    pub fn acquire_at(&self, now: Instant) -> Result<(), RequestError> {
        let mut state = self.lock();

        let window = state.window.unwrap_or(FALLBACK_WINDOW);
        while let Some(oldest) = state.timestamps.front() {
            if now.saturating_duration_since(*oldest) > window {
                state.timestamps.pop_front();
            } else {
                break;
            }
        }

        if state.limit.is_some() {
            if state.timestamps.len() >= self.period_max {
                let elapsed = state
                    .timestamps
                    .front()
                    .map(|oldest| now.saturating_duration_since(*oldest))
                    .unwrap_or_default();
                return Err(RequestError::RateLimited {
                    retry_after: window.saturating_sub(elapsed),
                });
            }

            match state.server_wait(now) {
                Some(retry_after) => return Err(RequestError::RateLimited { retry_after }),
                // a drained bucket whose reset has passed is full again
                None if state.remaining.is_some_and(|r| r <= 1) => {
                    state.remaining = state.limit;
                }
                None => {}
            }
        }

        state.timestamps.push_back(now);
        if let Some(remaining) = state.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
        Ok(())
    }

    /// Overwrites the bucket from a response's headers. Absent or malformed
    /// headers leave the previous value in place.
    pub fn observe(&self, headers: &HeaderMap) {
        self.observe_at(headers, Instant::now())
    }

    pub fn observe_at(&self, headers: &HeaderMap, now: Instant) {
        let limit = parse_header_value(headers, "ratelimit-limit");
        let window = headers
            .get("ratelimit-policy")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_policy_window);
        let remaining = parse_header_value(headers, "ratelimit-remaining");
        let reset = parse_header_value(headers, "ratelimit-reset").map(|s| Duration::from_secs(s as u64));

        let mut state = self.lock();
        if limit.is_some() {
            state.limit = limit;
        }
        if window.is_some() {
            state.window = window;
        }
        if remaining.is_some() {
            state.remaining = remaining;
        }
        if reset.is_some() {
            state.reset = reset;
        }
        if remaining.is_some() || reset.is_some() {
            state.observed_at = Some(now);
        }
        log::trace!(
            "Rate bucket: limit={:?} window={:?} remaining={:?} reset={:?}",
            state.limit,
            state.window,
            state.remaining,
            state.reset
        );
    }

    /// The wait advertised by a throttled response: `Retry-After` in seconds,
    /// else the bucket reset.
    pub fn retry_after(&self, headers: &HeaderMap) -> Duration {
        parse_header_value(headers, "retry-after")
            .map(|s| Duration::from_secs(s as u64))
            .or(self.lock().reset)
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> RateSnapshot {
        let state = self.lock();
        RateSnapshot {
            limit: state.limit,
            window_secs: state.window.map(|w| w.as_secs()),
            remaining: state.remaining,
            reset_secs: state.reset.map(|r| r.as_secs()),
            in_window: state.timestamps.len(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn parse_header_value(headers: &HeaderMap, name: &str) -> Option<usize> {
    headers.get(name)?.to_str().ok()?.trim().parse::<usize>().ok()
}

/// `RateLimit-Policy: 50;w=30` -> 30 seconds.
fn parse_policy_window(policy: &str) -> Option<Duration> {
    policy
        .split(';')
        .skip(1)
        .filter_map(|param| param.trim().strip_prefix("w="))
        .find_map(|w| w.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
