//! Queue tuning and backend configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::retry::RetryPolicy;

/// Prefix for environment overrides, e.g. `OUTBOUND_QUEUE_BATCH_SIZE`.
pub const ENV_PREFIX: &str = "OUTBOUND_QUEUE_";

/// Store backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackendConfig {
    /// Process-local store; tasks do not survive a restart.
    #[default]
    InMemory,
    /// PostgreSQL `delivery_queue` table (requires the `postgres` feature).
    Postgres {
        /// Connection string.
        url: String,
        /// Pool size.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

const fn default_max_connections() -> u32 {
    5
}

/// Queue processor configuration. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum tasks fetched per dispatch tick.
    pub batch_size: usize,
    /// Attempts before a task is terminally failed.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_retry_delay_ms: u64,
    /// Dispatch tick period, in milliseconds.
    pub dispatch_interval_ms: u64,
    /// Ceiling on concurrent workers per batch.
    pub max_workers: usize,
    /// Deadline for a single delivery, in milliseconds.
    pub result_timeout_ms: u64,
    /// Capacity of the analytics side channel.
    pub analytics_buffer: usize,
    /// Store backend.
    pub store: StoreBackendConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_attempts: 5,
            base_retry_delay_ms: 5 * 60 * 1000,
            dispatch_interval_ms: 60 * 1000,
            max_workers: 5,
            result_timeout_ms: 5 * 60 * 1000,
            analytics_buffer: 1024,
            store: StoreBackendConfig::InMemory,
        }
    }
}

impl QueueConfig {
    /// Defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the attempt ceiling.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the base retry delay.
    #[must_use]
    pub fn with_base_retry_delay(mut self, delay: Duration) -> Self {
        self.base_retry_delay_ms = duration_ms(delay);
        self
    }

    /// Set the dispatch interval.
    #[must_use]
    pub fn with_dispatch_interval(mut self, interval: Duration) -> Self {
        self.dispatch_interval_ms = duration_ms(interval);
        self
    }

    /// Set the worker ceiling.
    #[must_use]
    pub const fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Set the per-task deadline.
    #[must_use]
    pub fn with_result_timeout(mut self, timeout: Duration) -> Self {
        self.result_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the analytics channel capacity.
    #[must_use]
    pub const fn with_analytics_buffer(mut self, capacity: usize) -> Self {
        self.analytics_buffer = capacity;
        self
    }

    /// Set the store backend.
    #[must_use]
    pub fn with_store(mut self, store: StoreBackendConfig) -> Self {
        self.store = store;
        self
    }

    /// Base retry delay.
    #[must_use]
    pub const fn base_retry_delay(&self) -> Duration {
        Duration::from_millis(self.base_retry_delay_ms)
    }

    /// Dispatch interval.
    #[must_use]
    pub const fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    /// Per-task deadline.
    #[must_use]
    pub const fn result_timeout(&self) -> Duration {
        Duration::from_millis(self.result_timeout_ms)
    }

    /// Retry policy derived from this configuration.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.base_retry_delay())
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// A message naming the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be greater than 0".into());
        }
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".into());
        }
        if self.base_retry_delay_ms == 0 {
            return Err("base_retry_delay_ms must be greater than 0".into());
        }
        if self.dispatch_interval_ms == 0 {
            return Err("dispatch_interval_ms must be greater than 0".into());
        }
        if self.max_workers == 0 {
            return Err("max_workers must be greater than 0".into());
        }
        if self.result_timeout_ms == 0 {
            return Err("result_timeout_ms must be greater than 0".into());
        }
        if self.analytics_buffer == 0 {
            return Err("analytics_buffer must be greater than 0".into());
        }
        if let StoreBackendConfig::Postgres {
            url,
            max_connections,
        } = &self.store
        {
            if url.trim().is_empty() {
                return Err("postgres url must not be empty".into());
            }
            if *max_connections == 0 {
                return Err("postgres max_connections must be greater than 0".into());
            }
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate. Missing fields take
    /// their defaults.
    ///
    /// # Errors
    /// Parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by `OUTBOUND_QUEUE_*` variables and `DATABASE_URL`, after
    /// loading a `.env` file if one exists.
    ///
    /// # Errors
    /// An unparsable variable or a failed validation.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`QueueConfig::from_env`] with an arbitrary variable source.
    ///
    /// # Errors
    /// An unparsable variable or a failed validation.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let mut cfg = Self::default();
        override_from(&lookup, "BATCH_SIZE", &mut cfg.batch_size)?;
        override_from(&lookup, "MAX_ATTEMPTS", &mut cfg.max_attempts)?;
        override_from(&lookup, "BASE_RETRY_DELAY_MS", &mut cfg.base_retry_delay_ms)?;
        override_from(&lookup, "DISPATCH_INTERVAL_MS", &mut cfg.dispatch_interval_ms)?;
        override_from(&lookup, "MAX_WORKERS", &mut cfg.max_workers)?;
        override_from(&lookup, "RESULT_TIMEOUT_MS", &mut cfg.result_timeout_ms)?;
        override_from(&lookup, "ANALYTICS_BUFFER", &mut cfg.analytics_buffer)?;
        if let Some(url) = lookup("DATABASE_URL").filter(|u| !u.trim().is_empty()) {
            let mut max_connections = default_max_connections();
            override_from(&lookup, "DB_MAX_CONNECTIONS", &mut max_connections)?;
            cfg.store = StoreBackendConfig::Postgres {
                url,
                max_connections,
            };
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn override_from<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    suffix: &str,
    slot: &mut T,
) -> Result<(), String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let key = format!("{ENV_PREFIX}{suffix}");
    if let Some(raw) = lookup(&key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| format!("invalid {key}=`{raw}`: {e}"))?;
    }
    Ok(())
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
