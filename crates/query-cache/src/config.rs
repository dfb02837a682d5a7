//! Cache configuration options

use query_core::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the LRU cacher and its expiry sweeper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached id-lists
    pub max_ids: usize,
    /// Maximum number of cached beans
    pub max_beans: usize,
    /// Idle time after which an entry is treated as absent
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
    /// Delay between two expiry sweeps
    #[serde(with = "duration_secs")]
    pub sweep_interval: Duration,
    /// Upper bound on entries removed per cache kind in one sweep
    pub max_removed_per_sweep: usize,
    /// Whether caching is enabled
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_ids: 1000,
            max_beans: 1000,
            ttl: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(10 * 60),
            max_removed_per_sweep: 20,
            enabled: true,
        }
    }
}

impl CacheConfig {
    /// Create a configuration with the same bound for both cache kinds
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            max_ids: max_entries,
            max_beans: max_entries,
            ttl,
            ..Default::default()
        }
    }

    /// Create a disabled cache configuration
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: CacheConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the bound for both cache kinds
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_ids = max_entries;
        self.max_beans = max_entries;
        self
    }

    /// Set the id-list bound
    pub fn with_max_ids(mut self, max_ids: usize) -> Self {
        self.max_ids = max_ids;
        self
    }

    /// Set the bean bound
    pub fn with_max_beans(mut self, max_beans: usize) -> Self {
        self.max_beans = max_beans;
        self
    }

    /// Set the TTL duration
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the sweep interval
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the per-sweep removal cap
    pub fn with_max_removed_per_sweep(mut self, cap: usize) -> Self {
        self.max_removed_per_sweep = cap;
        self
    }

    /// Enable or disable the cache
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Check that every bound is usable
    pub fn validate(&self) -> Result<()> {
        if self.max_ids == 0 || self.max_beans == 0 {
            return Err(CacheError::InvalidConfig(
                "max_ids and max_beans must be greater than 0".to_string(),
            ));
        }
        if self.ttl.is_zero() {
            return Err(CacheError::InvalidConfig(
                "ttl must be greater than 0".to_string(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(CacheError::InvalidConfig(
                "sweep_interval must be greater than 0".to_string(),
            ));
        }
        if self.max_removed_per_sweep == 0 {
            return Err(CacheError::InvalidConfig(
                "max_removed_per_sweep must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the remote cacher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteCacheConfig {
    /// Expiration applied by plain puts; `None` keeps keys until deleted
    #[serde(with = "option_duration_secs")]
    pub default_expiration: Option<Duration>,
    /// Namespace prepended to every key
    pub key_prefix: String,
}

impl Default for RemoteCacheConfig {
    fn default() -> Self {
        Self {
            default_expiration: None,
            key_prefix: "qc".to_string(),
        }
    }
}

impl RemoteCacheConfig {
    /// Set the expiration used by plain puts
    pub fn with_default_expiration(mut self, expiration: Option<Duration>) -> Self {
        self.default_expiration = expiration;
        self
    }

    /// Set the key namespace
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.key_prefix.is_empty() {
            return Err(CacheError::InvalidConfig(
                "key_prefix must not be empty".to_string(),
            ));
        }
        if self
            .key_prefix
            .chars()
            .any(|c| matches!(c, '*' | '?' | '[' | ']' | '\\' | ':'))
        {
            return Err(CacheError::InvalidConfig(format!(
                "key_prefix '{}' must not contain ':' or glob characters",
                self.key_prefix
            )));
        }
        // Backends expire at whole-second granularity
        if matches!(self.default_expiration, Some(d) if d.as_secs() == 0) {
            return Err(CacheError::InvalidConfig(
                "default_expiration must be at least one second".to_string(),
            ));
        }
        Ok(())
    }
}

/// Connection settings for a Redis backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://localhost:6379/0`
    pub url: String,
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
    /// Read and write timeout of every command
    #[serde(with = "duration_secs")]
    pub operation_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            connect_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(2),
        }
    }
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(CacheError::InvalidConfig("redis url must not be empty".to_string()));
        }
        if self.connect_timeout.is_zero() || self.operation_timeout.is_zero() {
            return Err(CacheError::InvalidConfig(
                "redis timeouts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Durations are written as whole seconds in config files
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

pub(crate) mod option_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|secs| secs.map(Duration::from_secs))
    }
}
