//! Retry policy (C5): attempt bounds, delay parameters, and `Retry-After` parsing.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use http::HeaderMap;

use crate::error::{DEFAULT_RETRYABLE_STATUS_CODES, PipelineError};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
    pub retryable_status_codes: Option<HashSet<u16>>,
    pub retryable_errors: Option<Vec<String>>,
}

impl RetryPolicy {
    /// `max_retries = 0` ⇒ single attempt, no retry.
    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        jitter: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            multiplier,
            jitter,
            retryable_status_codes: None,
            retryable_errors: None,
        }
    }

    pub fn default_policy() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(30), 2.0, 0.1)
    }

    pub fn aggressive() -> Self {
        Self::new(
            5,
            Duration::from_millis(500),
            Duration::from_secs(10),
            1.5,
            0.2,
        )
    }

    pub fn conservative() -> Self {
        Self::new(2, Duration::from_secs(2), Duration::from_secs(60), 3.0, 0.05)
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO, 1.0, 0.0)
    }

    fn status_is_retryable(&self, status: u16) -> bool {
        match &self.retryable_status_codes {
            Some(set) => set.contains(&status),
            None => DEFAULT_RETRYABLE_STATUS_CODES.contains(&status),
        }
    }

    /// `false` if `attempt >= max_retries`; otherwise true iff the error is
    /// tagged retryable or its status is in the (possibly overridden) set.
    pub fn should_retry(&self, err: &PipelineError, attempt: u32) -> bool {
        if attempt >= self.max_retries {
            return false;
        }
        if err.is_retryable() {
            return true;
        }
        let status = err.status_code();
        status != 0 && self.status_is_retryable(status)
    }

    /// Prefers `Retry-After` (clamped to `max_delay`); otherwise computes
    /// `initial_delay * multiplier^attempt`, clamped.
    pub fn get_retry_delay(&self, attempt: u32, headers: Option<&HeaderMap>) -> Duration {
        if let Some(headers) = headers
            && let Some(retry_after) = parse_retry_after(headers)
        {
            return retry_after.min(self.max_delay);
        }
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(base).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::default_policy()
    }
}

/// Accepts a non-negative decimal-seconds integer or an HTTP-date. Past
/// dates and negative values yield zero.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?;
    parse_retry_after_value(value)
}

pub fn parse_retry_after_value(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.trim().parse::<i64>() {
        return Some(Duration::from_secs(secs.max(0) as u64));
    }
    if let Ok(date) = DateTime::parse_from_rfc2822(value.trim()) {
        let now = Utc::now();
        let target = date.with_timezone(&Utc);
        let delta = target.signed_duration_since(now);
        let secs = delta.num_seconds().max(0);
        return Some(Duration::from_secs(secs as u64));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retry_policy_values() {
        let policy = RetryPolicy::default_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert_eq!(policy.multiplier, 2.0);
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_secs(1), 2.0, 0.0);
        let err = PipelineError::from_status(503, "boom");
        assert!(policy.should_retry(&err, 0));
        assert!(policy.should_retry(&err, 1));
        assert!(!policy.should_retry(&err, 2));
    }

    #[test]
    fn should_retry_false_for_non_retryable_status() {
        let policy = RetryPolicy::default_policy();
        let err = PipelineError::from_status(400, "bad");
        assert!(!policy.should_retry(&err, 0));
    }

    #[test]
    fn parse_retry_after_seconds() {
        assert_eq!(
            parse_retry_after_value("120"),
            Some(Duration::from_secs(120))
        );
    }

    #[test]
    fn parse_retry_after_negative_clamped_to_zero() {
        assert_eq!(parse_retry_after_value("-5"), Some(Duration::ZERO));
    }

    #[test]
    fn parse_retry_after_past_date_clamped_to_zero() {
        assert_eq!(
            parse_retry_after_value("Tue, 01 Jan 2000 00:00:00 GMT"),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn get_retry_delay_exponential() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(10), 2.0, 0.0);
        assert_eq!(policy.get_retry_delay(0, None), Duration::from_millis(100));
        assert_eq!(policy.get_retry_delay(1, None), Duration::from_millis(200));
        assert_eq!(policy.get_retry_delay(2, None), Duration::from_millis(400));
    }

    #[test]
    fn get_retry_delay_capped_at_max() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(5), 2.0, 0.0);
        assert_eq!(policy.get_retry_delay(10, None), Duration::from_secs(5));
    }

    #[test]
    fn get_retry_delay_prefers_retry_after_header() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(30), 2.0, 0.0);
        let mut headers = HeaderMap::new();
        headers.insert(http::header::RETRY_AFTER, "7".parse().unwrap());
        assert_eq!(policy.get_retry_delay(0, Some(&headers)), Duration::from_secs(7));
    }
}
