//! Retry policy with exponential backoff.
//!
//! A failed attempt is retried only when the error kind is retryable, the
//! method is eligible, the error is network-level or carries an eligible
//! status, and the retry count has not passed the configured maximum.

use crate::base::neterror::{ErrorKind, RequestError};
use http::{HeaderMap, Method, StatusCode};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Base delay of the first retry.
const BASE_DELAY_MS: u64 = 1000;

/// Upper bound of the deterministic jitter added to each backoff step.
const JITTER_RANGE_MS: u64 = 100;

/// Statuses whose `Retry-After` header overrides the computed delay.
const RETRY_AFTER_STATUSES: [u16; 3] = [413, 429, 503];

/// User-supplied delay function: `(retry_count, error) -> delay`.
/// `None` or a zero delay stops retrying.
pub type ComputeDelay = Arc<dyn Fn(u32, &RequestError) -> Option<Duration> + Send + Sync>;

#[derive(Clone)]
pub enum Retries {
    Limit(u32),
    Compute(ComputeDelay),
}

impl fmt::Debug for Retries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Retries::Limit(n) => f.debug_tuple("Limit").field(n).finish(),
            Retries::Compute(_) => f.write_str("Compute(..)"),
        }
    }
}

impl From<u32> for Retries {
    fn from(limit: u32) -> Self {
        Retries::Limit(limit)
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    fn stop() -> Self {
        Self {
            retry: false,
            delay: Duration::ZERO,
        }
    }

    fn after(delay: Duration) -> Self {
        Self { retry: true, delay }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub retries: Retries,
    pub methods: HashSet<Method>,
    pub status_codes: BTreeSet<u16>,
    /// Ceiling for any delay. `None` is unbounded.
    pub max_retry_after: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: Retries::Limit(2),
            methods: [
                Method::GET,
                Method::PUT,
                Method::HEAD,
                Method::DELETE,
                Method::OPTIONS,
                Method::TRACE,
            ]
            .into_iter()
            .collect(),
            status_codes: [408, 413, 429, 500, 502, 503, 504].into_iter().collect(),
            max_retry_after: None,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            retries: Retries::Limit(0),
            ..Default::default()
        }
    }

    pub fn limit(retries: u32) -> Self {
        Self {
            retries: Retries::Limit(retries),
            ..Default::default()
        }
    }

    pub fn compute<F>(f: F) -> Self
    where
        F: Fn(u32, &RequestError) -> Option<Duration> + Send + Sync + 'static,
    {
        Self {
            retries: Retries::Compute(Arc::new(f)),
            ..Default::default()
        }
    }

    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    pub fn status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.status_codes = codes.into_iter().collect();
        self
    }

    pub fn max_retry_after(mut self, cap: Duration) -> Self {
        self.max_retry_after = Some(cap);
        self
    }

    /// Decide whether retry number `retry_count` (1-based) should happen.
    pub fn should_retry(&self, retry_count: u32, error: &RequestError) -> RetryDecision {
        let kind = error.kind();
        if !kind.is_retryable() {
            return RetryDecision::stop();
        }

        if let Some(method) = error.method() {
            if !self.methods.contains(method) {
                return RetryDecision::stop();
            }
        }
        let status = match kind {
            ErrorKind::Http { status, .. } => Some(*status),
            _ => None,
        };
        if let Some(status) = status {
            if !self.status_codes.contains(&status.as_u16()) {
                return RetryDecision::stop();
            }
        }

        // The function only picks the delay and when to stop.
        if let Retries::Compute(compute) = &self.retries {
            return match compute(retry_count, error) {
                Some(delay) if !delay.is_zero() => RetryDecision::after(self.cap(delay)),
                _ => RetryDecision::stop(),
            };
        }

        let Retries::Limit(limit) = self.retries else {
            return RetryDecision::stop();
        };
        if retry_count == 0 || retry_count > limit {
            return RetryDecision::stop();
        }

        if let Some(status) = status {
            if RETRY_AFTER_STATUSES.contains(&status.as_u16()) {
                if let Some(delay) = error.headers().and_then(parse_retry_after) {
                    return RetryDecision::after(self.cap(delay));
                }
            }
            if status == StatusCode::PAYLOAD_TOO_LARGE {
                return RetryDecision::stop();
            }
        }

        RetryDecision::after(self.cap(calculate_backoff(retry_count)))
    }

    fn cap(&self, delay: Duration) -> Duration {
        match self.max_retry_after {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

/// Calculate the backoff delay for a given retry.
///
/// Exponential: `1s * 2^(retry-1)` plus a deterministic jitter below 100ms.
pub fn calculate_backoff(retry_count: u32) -> Duration {
    if retry_count == 0 {
        return Duration::ZERO;
    }

    let delay_ms = BASE_DELAY_MS.saturating_mul(1 << (retry_count - 1).min(20));
    let jitter = (retry_count as u64 * 37) % JITTER_RANGE_MS;

    Duration::from_millis(delay_ms.saturating_add(jitter))
}

/// Parse a `Retry-After` header as delta-seconds or an HTTP-date.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let when = httpdate::parse_http_date(value).ok()?;
    Some(
        when.duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO),
    )
}
