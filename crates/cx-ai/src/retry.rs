//! Backoff arithmetic for provider requests.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const BASE_BACKOFF_MS: u64 = 200;
const MAX_BACKOFF_SHIFT: usize = 6;

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);
static JITTER_SEED: AtomicU64 = AtomicU64::new(0x5DEE_CE66_D1CE_4E5B);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Retry limits applied to one logical provider request.
pub struct RetryPolicy {
    pub max_retries: usize,
    /// Upper bound on total elapsed time spent waiting; `0` disables the bound.
    pub budget_ms: u64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            budget_ms: 0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Exponential delay for `attempt`, never shorter than a server `retry-after`.
    pub fn delay_ms(&self, attempt: usize, retry_after_ms: Option<u64>) -> u64 {
        let backoff = if self.jitter {
            jittered(exponential_backoff_ms(attempt))
        } else {
            exponential_backoff_ms(attempt)
        };
        retry_after_ms.map_or(backoff, |floor| backoff.max(floor))
    }

    /// Returns the delay to sleep before the next attempt, or `None` when the
    /// attempt count or the elapsed-time budget is exhausted.
    pub fn next_delay(
        &self,
        attempt: usize,
        elapsed: Duration,
        retry_after_ms: Option<u64>,
    ) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let delay_ms = self.delay_ms(attempt, retry_after_ms);
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        if self.budget_ms != 0 && elapsed_ms.saturating_add(delay_ms) > self.budget_ms {
            return None;
        }
        Some(Duration::from_millis(delay_ms))
    }
}

pub fn exponential_backoff_ms(attempt: usize) -> u64 {
    BASE_BACKOFF_MS.saturating_mul(1_u64 << attempt.min(MAX_BACKOFF_SHIFT))
}

// Picks a value in [base/2, base].
fn jittered(base: u64) -> u64 {
    if base <= 1 {
        return base;
    }
    let seed = JITTER_SEED.fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::Relaxed);
    let mixed = (seed ^ (seed >> 31)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    let low = base / 2;
    low + mixed % (base - low + 1)
}

pub fn should_retry_status(status: u16) -> bool {
    matches!(status, 408 | 409 | 425 | 429) || status >= 500
}

pub fn is_retryable_http_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}

/// Reads `retry-after` as either delta-seconds or an HTTP date.
pub fn parse_retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let raw = headers.get("retry-after")?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds.saturating_mul(1_000));
    }

    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let delay_ms = retry_at.signed_duration_since(Utc::now()).num_milliseconds();
    Some(u64::try_from(delay_ms).unwrap_or(0))
}

pub fn new_request_id() -> String {
    let count = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("cx-{}-{count}", Utc::now().timestamp_millis())
}
