//! Proxy-side configuration types.

use std::time::Duration;

use serde::Deserialize;

/// Defaults applied to proxies built with a config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Service name used when a proxy is built without one.
    pub default_service: Option<String>,
    /// Object path used when a proxy is built without one.
    pub default_path: String,
    /// Per-call timeout in milliseconds. None = wait forever.
    pub call_timeout_ms: Option<u64>,
    /// Retry policy for `call_with_retry`.
    pub retry: RetryConfig,
}

impl ClientConfig {
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_service: None,
            default_path: "/".to_string(),
            call_timeout_ms: Some(25_000),
            retry: RetryConfig::default(),
        }
    }
}

/// Exponential backoff settings for retried calls.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_attempts: usize,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay_ms: 10,
            max_delay_ms: 1_000,
        }
    }
}
