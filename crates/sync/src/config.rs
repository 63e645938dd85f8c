use std::str::FromStr;
use std::time::Duration;

use crate::reconnect::BackoffPolicy;

/// Supervisor tuning loaded from environment variables.
///
/// All fields have defaults suitable for local development. In
/// production, override via environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    /// Base delay between progress polls (default: 1000 ms).
    pub progress_interval: Duration,
    /// Base delay between log polls (default: 1500 ms).
    pub log_interval: Duration,
    /// Timeout applied to every individual transport call (default: 10 s).
    pub request_timeout: Duration,
    /// Backoff applied to a channel under sustained failures.
    pub backoff: BackoffPolicy,
    /// Stream connects allowed before falling back to polling (default: 3).
    pub max_stream_attempts: u32,
    /// Silence on an open stream after which it counts as dropped
    /// (default: 30 s).
    pub stream_idle_timeout: Duration,
    /// Use the event stream when the transport offers one (default: true).
    pub prefer_stream: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            progress_interval: Duration::from_millis(1000),
            log_interval: Duration::from_millis(1500),
            request_timeout: Duration::from_secs(10),
            backoff: BackoffPolicy::default(),
            max_stream_attempts: 3,
            stream_idle_timeout: Duration::from_secs(30),
            prefer_stream: true,
        }
    }
}

impl SupervisorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default |
    /// |--------------------------------|---------|
    /// | `SYNC_PROGRESS_INTERVAL_MS`    | `1000`  |
    /// | `SYNC_LOG_INTERVAL_MS`         | `1500`  |
    /// | `SYNC_REQUEST_TIMEOUT_MS`      | `10000` |
    /// | `SYNC_BACKOFF_AFTER_FAILURES`  | `3`     |
    /// | `SYNC_BACKOFF_MAX_MS`          | `30000` |
    /// | `SYNC_BACKOFF_MULTIPLIER`      | `2.0`   |
    /// | `SYNC_STREAM_MAX_ATTEMPTS`     | `3`     |
    /// | `SYNC_STREAM_IDLE_TIMEOUT_MS`  | `30000` |
    /// | `SYNC_PREFER_STREAM`           | `true`  |
    ///
    /// Malformed values are logged and replaced by the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let millis = |name: &str, default: Duration| {
            Duration::from_millis(env_or(name, default.as_millis() as u64))
        };

        let mut multiplier: f64 = env_or("SYNC_BACKOFF_MULTIPLIER", defaults.backoff.multiplier);
        if !multiplier.is_finite() || multiplier < 1.0 {
            tracing::warn!(multiplier, "SYNC_BACKOFF_MULTIPLIER below 1.0, using default");
            multiplier = defaults.backoff.multiplier;
        }

        Self {
            progress_interval: millis("SYNC_PROGRESS_INTERVAL_MS", defaults.progress_interval),
            log_interval: millis("SYNC_LOG_INTERVAL_MS", defaults.log_interval),
            request_timeout: millis("SYNC_REQUEST_TIMEOUT_MS", defaults.request_timeout),
            backoff: BackoffPolicy {
                after_failures: env_or("SYNC_BACKOFF_AFTER_FAILURES", defaults.backoff.after_failures),
                max_delay: millis("SYNC_BACKOFF_MAX_MS", defaults.backoff.max_delay),
                multiplier,
                jitter: defaults.backoff.jitter,
            },
            max_stream_attempts: env_or("SYNC_STREAM_MAX_ATTEMPTS", defaults.max_stream_attempts),
            stream_idle_timeout: millis("SYNC_STREAM_IDLE_TIMEOUT_MS", defaults.stream_idle_timeout),
            prefer_stream: env_or("SYNC_PREFER_STREAM", defaults.prefer_stream),
        }
    }
}

/// Read and parse `name`, falling back to `default` when unset or invalid.
fn env_or<T>(name: &str, default: T) -> T
where
    T: FromStr,
{
    match std::env::var(name) {
        Ok(raw) => parse_or(name, &raw, default),
        Err(_) => default,
    }
}

fn parse_or<T: FromStr>(name: &str, raw: &str, default: T) -> T {
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(var = name, value = raw, "Invalid value, using default");
            default
        }
    }
}
