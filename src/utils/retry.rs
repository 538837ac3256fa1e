//! Retry utilities: backoff builders for retried calls.
//!
//! Uses `backon` for exponential backoff with jitter. Which errors are
//! worth retrying is decided by [`Error::is_retryable`](crate::Error::is_retryable).

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::config::RetryConfig;

/// Backoff for proxy calls, from configuration.
pub fn call_backoff(config: &RetryConfig) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(config.min_delay_ms))
        .with_max_delay(Duration::from_millis(config.max_delay_ms))
        .with_max_times(config.max_attempts)
        .with_jitter()
}

#[cfg(test)]
mod tests {
    use super::*;
    use backon::BackoffBuilder;

    #[test]
    fn test_call_backoff_attempts() {
        let config = RetryConfig {
            max_attempts: 4,
            min_delay_ms: 1,
            max_delay_ms: 5,
        };
        let delays: Vec<Duration> = call_backoff(&config).build().collect();
        assert_eq!(delays.len(), 4);
        // Jitter may add up to one extra delay on top.
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(10)));
    }

    #[test]
    fn test_call_backoff_disabled() {
        let config = RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        };
        assert_eq!(call_backoff(&config).build().count(), 0);
    }
}
