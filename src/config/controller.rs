//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Values are fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace holding the shared upstream Certificates and their secrets
    pub cache_namespace: String,
    /// Port of the metrics and probe server
    pub metrics_port: u16,
    /// Deadline applied to every individual store call (seconds)
    pub store_call_timeout_secs: u64,
    /// Fixed wait while the upstream secret has not been issued (seconds)
    pub upstream_secret_retry_secs: u64,
    /// Fixed wait after the upstream secret failed validation (seconds)
    pub invalid_secret_retry_secs: u64,
    /// Fixed wait before retrying a failed fan-out status write (seconds)
    pub fanout_retry_secs: u64,
    /// Attempts per dependent before a fan-out write is abandoned
    pub fanout_max_attempts: u32,
    /// Error policy backoff floor (seconds)
    pub backoff_min_secs: u64,
    /// Error policy backoff ceiling (seconds)
    pub backoff_max_secs: u64,
    /// Delay before restarting a watch stream (seconds)
    pub watch_restart_delay_secs: u64,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE), used when `RUST_LOG` is unset
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            cache_namespace: DEFAULT_CACHE_NAMESPACE.to_string(),
            metrics_port: DEFAULT_METRICS_PORT,
            store_call_timeout_secs: DEFAULT_STORE_CALL_TIMEOUT_SECS,
            upstream_secret_retry_secs: DEFAULT_UPSTREAM_SECRET_RETRY_SECS,
            invalid_secret_retry_secs: DEFAULT_INVALID_SECRET_RETRY_SECS,
            fanout_retry_secs: DEFAULT_FANOUT_RETRY_SECS,
            fanout_max_attempts: DEFAULT_FANOUT_MAX_ATTEMPTS,
            backoff_min_secs: DEFAULT_BACKOFF_MIN_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            log_level: "INFO".to_string(),
            log_format: "text".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            cache_namespace: env_var_or_default_str("CACHE_NAMESPACE", DEFAULT_CACHE_NAMESPACE),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            store_call_timeout_secs: env_var_or_default(
                "STORE_CALL_TIMEOUT_SECS",
                DEFAULT_STORE_CALL_TIMEOUT_SECS,
            ),
            upstream_secret_retry_secs: env_var_or_default(
                "UPSTREAM_SECRET_RETRY_SECS",
                DEFAULT_UPSTREAM_SECRET_RETRY_SECS,
            ),
            invalid_secret_retry_secs: env_var_or_default(
                "INVALID_SECRET_RETRY_SECS",
                DEFAULT_INVALID_SECRET_RETRY_SECS,
            ),
            fanout_retry_secs: env_var_or_default("FANOUT_RETRY_SECS", DEFAULT_FANOUT_RETRY_SECS),
            fanout_max_attempts: env_var_or_default(
                "FANOUT_MAX_ATTEMPTS",
                DEFAULT_FANOUT_MAX_ATTEMPTS,
            ),
            backoff_min_secs: env_var_or_default("BACKOFF_MIN_SECS", DEFAULT_BACKOFF_MIN_SECS),
            backoff_max_secs: env_var_or_default("BACKOFF_MAX_SECS", DEFAULT_BACKOFF_MAX_SECS),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            log_level: env_var_or_default_str("LOG_LEVEL", "INFO"),
            log_format: env_var_or_default_str("LOG_FORMAT", "text"),
        }
    }

    /// Get the per-call store deadline
    pub fn store_call_timeout(&self) -> Duration {
        Duration::from_secs(self.store_call_timeout_secs)
    }

    /// Get the upstream secret wait duration
    pub fn upstream_secret_retry(&self) -> Duration {
        Duration::from_secs(self.upstream_secret_retry_secs)
    }

    /// Get the invalid secret retry duration
    pub fn invalid_secret_retry(&self) -> Duration {
        Duration::from_secs(self.invalid_secret_retry_secs)
    }

    /// Get the fan-out retry duration
    pub fn fanout_retry(&self) -> Duration {
        Duration::from_secs(self.fanout_retry_secs)
    }

    /// Get watch restart delay duration
    pub fn watch_restart_delay(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_documented_delays() {
        let config = ControllerConfig::default();
        assert_eq!(config.upstream_secret_retry(), Duration::from_secs(2));
        assert_eq!(config.invalid_secret_retry(), Duration::from_secs(3));
        assert_eq!(config.fanout_retry(), Duration::from_secs(3));
        assert_eq!(config.cache_namespace, "cached-certificates");
    }

    #[test]
    fn test_env_var_or_default_falls_back_on_garbage() {
        // Key is unique to this test so parallel tests cannot interfere
        std::env::set_var("CCC_TEST_GARBAGE_PORT", "not-a-number");
        let port: u16 = env_var_or_default("CCC_TEST_GARBAGE_PORT", 9000);
        assert_eq!(port, 9000);
        std::env::remove_var("CCC_TEST_GARBAGE_PORT");
    }

    #[test]
    fn test_env_var_or_default_str_ignores_blank() {
        std::env::set_var("CCC_TEST_BLANK_NAMESPACE", "  ");
        assert_eq!(
            env_var_or_default_str("CCC_TEST_BLANK_NAMESPACE", "fallback"),
            "fallback"
        );
        std::env::remove_var("CCC_TEST_BLANK_NAMESPACE");
    }
}
