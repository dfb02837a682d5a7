use anyhow::{Context, Result};
use query_cache::{CacheConfig, RedisConfig, RemoteCacheConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub remote: RemoteCacheConfig,
    pub redis: RedisConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {:?}", path))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.cache.validate().context("Invalid [cache] section")?;
        self.remote.validate().context("Invalid [remote] section")?;
        self.redis.validate().context("Invalid [redis] section")?;
        Ok(())
    }
}
