//! Retry policy: decides backoff delays and rate-limit waits.

use std::time::Duration;

use reqwest::Response;

use crate::config::ApiConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,

    /// Linear step: retry `n` (0-based) waits `backoff_base * (n + 1)`.
    pub backoff_base: Duration,

    /// Consecutive 429 waits tolerated before giving up.
    pub max_rate_limit_waits: u32,

    /// Wait used when a 429 carries no usable `Retry-After`.
    pub default_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ApiConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(api: &ApiConfig) -> Self {
        Self {
            max_retries: api.max_retries,
            backoff_base: api.backoff_base(),
            max_rate_limit_waits: api.max_rate_limit_waits,
            default_retry_after: api.default_retry_after(),
        }
    }

    /// Delay before retry number `retry` (0-based).
    ///
    /// With base=1s: 1s, 2s, 3s, ...
    pub fn backoff(&self, retry: u32) -> Duration {
        self.backoff_base.saturating_mul(retry.saturating_add(1))
    }

    pub fn rate_limit_wait(&self, retry_after_secs: Option<u64>) -> Duration {
        retry_after_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_retry_after)
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
pub fn parse_retry_after(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_api_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.backoff_base, Duration::from_secs(1));
        assert_eq!(policy.max_rate_limit_waits, 10);
        assert_eq!(policy.default_retry_after, Duration::from_secs(5));
    }

    #[test]
    fn backoff_is_linear() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(3));
    }

    #[test]
    fn retry_after_overrides_default_wait() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.rate_limit_wait(Some(2)), Duration::from_secs(2));
        assert_eq!(policy.rate_limit_wait(None), Duration::from_secs(5));
    }
}
