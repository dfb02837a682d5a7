//! Redis backend for [`RemoteCacher`](crate::RemoteCacher)
//!
//! Requires the `redis` feature. Commands run on blocking connections with
//! read and write timeouts; idle connections are kept for reuse and a
//! connection that saw an error is dropped.

use crate::config::RedisConfig;
use crate::remote::RemoteStore;
use parking_lot::Mutex;
use query_core::{CacheError, Result};
use redis::{Client, Commands, Connection, RedisResult};
use std::time::Duration;
use tracing::debug;

const MAX_IDLE_CONNECTIONS: usize = 8;

/// Redis-backed remote store
pub struct RedisStore {
    client: Client,
    config: RedisConfig,
    idle: Mutex<Vec<Connection>>,
}

impl RedisStore {
    /// Create a store and check that the server is reachable
    pub fn connect(config: RedisConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::open(config.url.as_str())
            .map_err(|e| CacheError::Backend(format!("Redis client error: {}", e)))?;

        let store = Self {
            client,
            config,
            idle: Mutex::new(Vec::new()),
        };
        let conn = store.checkout()?;
        store.checkin(conn);
        debug!(target: "remote_cacher", url = %store.config.url, "Connected to redis");
        Ok(store)
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Round-trip a PING to the server
    pub fn ping(&self) -> Result<()> {
        self.with_connection("PING", |conn| redis::cmd("PING").query::<String>(conn))
            .map(|_| ())
    }

    fn checkout(&self) -> Result<Connection> {
        if let Some(conn) = self.idle.lock().pop() {
            return Ok(conn);
        }

        let conn = self
            .client
            .get_connection_with_timeout(self.config.connect_timeout)
            .map_err(|e| CacheError::Backend(format!("Redis connection error: {}", e)))?;
        let timeout = Some(self.config.operation_timeout);
        conn.set_read_timeout(timeout)
            .and_then(|_| conn.set_write_timeout(timeout))
            .map_err(|e| CacheError::Backend(format!("Redis connection error: {}", e)))?;
        Ok(conn)
    }

    fn checkin(&self, conn: Connection) {
        let mut idle = self.idle.lock();
        if idle.len() < MAX_IDLE_CONNECTIONS {
            idle.push(conn);
        }
    }

    fn with_connection<T>(
        &self,
        command: &str,
        f: impl FnOnce(&mut Connection) -> RedisResult<T>,
    ) -> Result<T> {
        let mut conn = self.checkout()?;
        match f(&mut conn) {
            Ok(value) => {
                self.checkin(conn);
                Ok(value)
            }
            Err(e) => Err(CacheError::Backend(format!("Redis {} error: {}", command, e))),
        }
    }
}

impl RemoteStore for RedisStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.with_connection("GET", |conn| conn.get::<_, Option<Vec<u8>>>(key))
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        match ttl {
            Some(ttl) => self.with_connection("SETEX", |conn| {
                conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            }),
            None => self.with_connection("SET", |conn| conn.set::<_, _, ()>(key, value)),
        }
    }

    fn del(&self, key: &str) -> Result<bool> {
        let deleted = self.with_connection("DEL", |conn| conn.del::<_, i64>(key))?;
        Ok(deleted > 0)
    }

    fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        self.with_connection("SCAN", |conn| {
            conn.scan_match::<_, String>(pattern)
                .map(|keys| keys.collect::<Vec<String>>())
        })
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("url", &self.config.url)
            .field("idle_connections", &self.idle.lock().len())
            .finish()
    }
}
