//! Cacher backed by a networked key/value service
//!
//! Expiry is left to the backend: every put carries a per-key expiration and
//! no recency state is kept in process. Keys are namespaced as
//!
//! ```text
//! {prefix}:bean:{table length}:{table}:{id}
//! {prefix}:sql:{table length}:{table}:{fingerprint digest}
//! ```
//!
//! Table clears scan for a pattern and delete key by key. A put racing with a
//! clear of the same table can survive the clear.

use crate::cacher::Cacher;
use crate::config::RemoteCacheConfig;
use crate::key::{decode_pk_list, encode_pk_list, fingerprint_digest};
use crate::registry::TypeRegistry;
use crate::value::CachedBean;
use query_core::{Pk, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Minimal key/value operations a remote backend has to provide
pub trait RemoteStore: Send + Sync {
    /// Fetch the bytes under `key`; `Ok(None)` is a miss
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store bytes under `key`, expiring after `ttl` when given
    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Remove `key`, returning whether it existed
    fn del(&self, key: &str) -> Result<bool>;

    /// Keys matching a glob pattern (`*`, `?`, `[...]`, `\` escapes)
    fn scan(&self, pattern: &str) -> Result<Vec<String>>;
}

impl<S: RemoteStore + ?Sized> RemoteStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        (**self).set(key, value, ttl)
    }

    fn del(&self, key: &str) -> Result<bool> {
        (**self).del(key)
    }

    fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        (**self).scan(pattern)
    }
}

/// Expiration of a single remote put
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiration {
    /// The configured default expiration
    #[default]
    Default,
    /// Keep the key until it is deleted
    Never,
    /// Expire after the given duration
    After(Duration),
}

impl Expiration {
    fn resolve(self, default: Option<Duration>) -> Option<Duration> {
        match self {
            Expiration::Default => default,
            Expiration::Never => None,
            Expiration::After(ttl) => Some(ttl),
        }
    }
}

/// Cacher storing encoded id-lists and registered bean types in a [`RemoteStore`]
pub struct RemoteCacher<S: RemoteStore> {
    store: S,
    registry: Arc<TypeRegistry>,
    config: RemoteCacheConfig,
}

impl<S: RemoteStore> RemoteCacher<S> {
    /// Create a remote cacher; beans of types missing from `registry` cannot be stored
    pub fn new(store: S, registry: TypeRegistry, config: RemoteCacheConfig) -> Result<Self> {
        config.validate()?;
        debug!(
            target: "remote_cacher",
            prefix = %config.key_prefix,
            types = registry.len(),
            "Remote cacher created"
        );
        Ok(Self {
            store,
            registry: Arc::new(registry),
            config,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RemoteCacheConfig {
        &self.config
    }

    /// Backend key of a bean
    pub fn bean_key(&self, table: &str, id: &str) -> String {
        format!(
            "{}:bean:{}:{}:{}",
            self.config.key_prefix,
            table.len(),
            table,
            id
        )
    }

    /// Backend key of an id-list; the fingerprint is hashed to bound key length
    pub fn ids_key(&self, table: &str, fingerprint: &str) -> String {
        format!(
            "{}:sql:{}:{}:{}",
            self.config.key_prefix,
            table.len(),
            table,
            fingerprint_digest(fingerprint)
        )
    }

    /// Cache an id-list with an explicit expiration
    pub fn put_ids_with(
        &self,
        table: &str,
        fingerprint: &str,
        ids: &[Pk],
        expiration: Expiration,
    ) -> Result<()> {
        let key = self.ids_key(table, fingerprint);
        let bytes = encode_pk_list(ids)?;
        let ttl = expiration.resolve(self.config.default_expiration);
        debug!(target: "remote_cacher", %key, count = ids.len(), ?ttl, "PutIds");
        self.store.set(&key, &bytes, ttl)
    }

    /// Cache a bean with an explicit expiration
    pub fn put_bean_with(
        &self,
        table: &str,
        id: &str,
        bean: &CachedBean,
        expiration: Expiration,
    ) -> Result<()> {
        let key = self.bean_key(table, id);
        let bytes = self.registry.encode(bean).map_err(|e| {
            warn!(target: "remote_cacher", %key, "Failed to encode {}: {}", bean.type_name(), e);
            e
        })?;
        let ttl = expiration.resolve(self.config.default_expiration);
        debug!(target: "remote_cacher", %key, ?ttl, "PutBean");
        self.store.set(&key, &bytes, ttl)
    }

    /// Delete every key under this cacher's namespace, returning how many were removed
    pub fn flush(&self) -> Result<usize> {
        let pattern = format!("{}:*", escape_glob(&self.config.key_prefix));
        let removed = self.del_matching(&pattern)?;
        debug!(target: "remote_cacher", removed, "Flushed namespace");
        Ok(removed)
    }

    fn fetch(&self, key: &str) -> Option<Vec<u8>> {
        match self.store.get(key) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(target: "remote_cacher", %key, "Lookup failed: {}", e);
                None
            }
        }
    }

    fn del_key(&self, key: &str) -> Result<()> {
        let existed = self.store.del(key)?;
        debug!(target: "remote_cacher", %key, existed, "Deleted key");
        Ok(())
    }

    /// Delete every key matching `pattern`; keeps going past failed deletes and reports the first
    fn del_matching(&self, pattern: &str) -> Result<usize> {
        let keys = self.store.scan(pattern)?;
        debug!(target: "remote_cacher", %pattern, found = keys.len(), "Deleting matching keys");

        let mut removed = 0;
        let mut first_err = None;
        for key in keys {
            match self.store.del(&key) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(target: "remote_cacher", %key, "Delete failed: {}", e);
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(removed), Err)
    }
}

impl<S: RemoteStore> Cacher for RemoteCacher<S> {
    fn get_ids(&self, table: &str, fingerprint: &str) -> Option<Vec<Pk>> {
        let key = self.ids_key(table, fingerprint);
        debug!(target: "remote_cacher", %key, "GetIds");
        let bytes = self.fetch(&key)?;
        match decode_pk_list(&bytes) {
            Ok(ids) => Some(ids),
            Err(e) => {
                warn!(target: "remote_cacher", %key, "Undecodable id-list: {}", e);
                None
            }
        }
    }

    fn put_ids(&self, table: &str, fingerprint: &str, ids: &[Pk]) -> Result<()> {
        self.put_ids_with(table, fingerprint, ids, Expiration::Default)
    }

    fn del_ids(&self, table: &str, fingerprint: &str) -> Result<()> {
        self.del_key(&self.ids_key(table, fingerprint))
    }

    fn clear_ids(&self, table: &str) -> Result<()> {
        let pattern = format!(
            "{}:sql:{}:{}:*",
            escape_glob(&self.config.key_prefix),
            table.len(),
            escape_glob(table)
        );
        self.del_matching(&pattern).map(|_| ())
    }

    fn get_bean(&self, table: &str, id: &str) -> Option<CachedBean> {
        let key = self.bean_key(table, id);
        debug!(target: "remote_cacher", %key, "GetBean");
        let bytes = self.fetch(&key)?;
        match self.registry.decode(&bytes) {
            Ok(bean) => Some(bean),
            Err(e) => {
                warn!(target: "remote_cacher", %key, "Undecodable bean: {}", e);
                None
            }
        }
    }

    fn put_bean(&self, table: &str, id: &str, bean: CachedBean) -> Result<()> {
        self.put_bean_with(table, id, &bean, Expiration::Default)
    }

    fn del_bean(&self, table: &str, id: &str) -> Result<()> {
        let removed = self.del_key(&self.bean_key(table, id));
        let cleared = self.clear_ids(table);
        removed.and(cleared)
    }

    fn clear_beans(&self, table: &str) -> Result<()> {
        let pattern = format!(
            "{}:bean:{}:{}:*",
            escape_glob(&self.config.key_prefix),
            table.len(),
            escape_glob(table)
        );
        self.del_matching(&pattern).map(|_| ())
    }
}

impl<S: RemoteStore> std::fmt::Debug for RemoteCacher<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCacher")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}

/// Escape glob metacharacters so a table name only matches itself in a scan pattern
pub fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
