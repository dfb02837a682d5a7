//! LRU cacher: bounded, TTL-aware id-list and bean caches over a [`CacheStore`]

use crate::cacher::Cacher;
use crate::config::CacheConfig;
use crate::key::{bean_key, decode_pk_list, encode_pk_list, ids_key};
use crate::recency::RecencyIndex;
use crate::stats::CacheStats;
use crate::store::CacheStore;
use crate::sweeper::{self, SweepReport, SweeperHandle};
use crate::value::{CacheValue, CachedBean};
use parking_lot::Mutex;
use query_core::{CacheError, Pk, Result};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Thread-safe LRU cacher for query id-lists and beans.
///
/// Each cache kind has its own lock covering its recency index and the
/// matching backend writes. When both are needed the bean lock is taken
/// first.
pub struct LruCacher {
    store: Arc<dyn CacheStore>,
    ids: Mutex<RecencyIndex>,
    beans: Mutex<RecencyIndex>,
    config: CacheConfig,
    stats: Arc<CacheStats>,
}

impl LruCacher {
    /// Create a cacher over `store`; the configuration is validated first
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            ids: Mutex::new(RecencyIndex::new()),
            beans: Mutex::new(RecencyIndex::new()),
            config,
            stats: Arc::new(CacheStats::new()),
        })
    }

    /// Create a cacher over `store` holding at most `max_entries` per kind, other settings default
    pub fn with_capacity(store: Arc<dyn CacheStore>, max_entries: usize) -> Result<Self> {
        Self::new(store, CacheConfig::default().with_max_entries(max_entries))
    }

    /// Spawn the periodic expiry sweep on the current tokio runtime.
    ///
    /// The task only holds a weak reference: it ends when the handle is shut
    /// down or dropped, or when the last `Arc` to the cacher goes away.
    pub fn start_sweeper(self: &Arc<Self>) -> Result<SweeperHandle> {
        sweeper::spawn(Arc::downgrade(self), self.config.sweep_interval)
    }

    /// Check if caching is enabled
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Get the cache configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get cache statistics
    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    /// Number of cached id-lists
    pub fn len_ids(&self) -> usize {
        self.ids.lock().len()
    }

    /// Number of cached beans
    pub fn len_beans(&self) -> usize {
        self.beans.lock().len()
    }

    /// Whether both recency indexes agree with their sequences and respect their bounds
    pub fn check_consistency(&self) -> bool {
        let beans_ok = {
            let beans = self.beans.lock();
            beans.is_consistent() && beans.len() <= self.config.max_beans
        };
        let ids_ok = {
            let ids = self.ids.lock();
            ids.is_consistent() && ids.len() <= self.config.max_ids
        };
        beans_ok && ids_ok
    }

    /// Run one expiry pass over both caches.
    ///
    /// Each cache is scanned from its oldest entry and the scan stops at the
    /// first live entry or after `max_removed_per_sweep` removals.
    pub fn sweep(&self) -> SweepReport {
        let now = Instant::now();
        let ttl = self.config.ttl;
        let cap = self.config.max_removed_per_sweep;
        let mut report = SweepReport::default();

        {
            let mut ids = self.ids.lock();
            while report.ids_removed < cap {
                let Some(entry) = ids.oldest_expired(now, ttl) else {
                    break;
                };
                if let Err(e) = self.del_ids_locked(&mut ids, &entry.table, &entry.key) {
                    warn!("Failed to drop expired id-list {}: {}", entry.key, e);
                }
                report.ids_removed += 1;
            }
            self.stats.set_id_entries(ids.len() as u64);
        }

        {
            let mut beans = self.beans.lock();
            while report.beans_removed < cap {
                let Some(entry) = beans.oldest_expired(now, ttl) else {
                    break;
                };
                if let Err(e) = self.del_bean_locked(&mut beans, &entry.table, &entry.key) {
                    warn!("Failed to drop expired bean {}: {}", entry.key, e);
                }
                report.beans_removed += 1;
            }
            self.stats.set_bean_entries(beans.len() as u64);
        }

        self.stats.record_expirations(report.total() as u64);
        debug!(
            ids_removed = report.ids_removed,
            beans_removed = report.beans_removed,
            "Expiry sweep finished"
        );
        report
    }

    fn del_ids_locked(&self, ids: &mut RecencyIndex, table: &str, fingerprint: &str) -> Result<()> {
        ids.remove(table, fingerprint);
        self.store.del(&ids_key(table, fingerprint))
    }

    fn clear_ids_locked(&self, ids: &mut RecencyIndex, table: &str) -> Result<()> {
        let mut first_err = None;
        for fingerprint in ids.take_table(table) {
            if let Err(e) = self.store.del(&ids_key(table, &fingerprint)) {
                first_err.get_or_insert(e);
            }
        }
        self.stats.set_id_entries(ids.len() as u64);
        first_err.map_or(Ok(()), Err)
    }

    /// Drop a bean and, since any id-list of the table may list it, every id-list of the table
    fn del_bean_locked(&self, beans: &mut RecencyIndex, table: &str, id: &str) -> Result<()> {
        beans.remove(table, id);
        let removed = self.store.del(&bean_key(table, id));

        let mut ids = self.ids.lock();
        let cleared = self.clear_ids_locked(&mut ids, table);
        removed.and(cleared)
    }

    fn clear_beans_locked(&self, beans: &mut RecencyIndex, table: &str) -> Result<()> {
        let mut first_err = None;
        for id in beans.take_table(table) {
            if let Err(e) = self.store.del(&bean_key(table, &id)) {
                first_err.get_or_insert(e);
            }
        }
        self.stats.set_bean_entries(beans.len() as u64);
        first_err.map_or(Ok(()), Err)
    }

    /// A read found no index entry; remove whatever the backend still holds for the key
    fn drop_stray(&self, key: &str) {
        if let Err(e) = self.store.del(key) {
            warn!("Failed to drop stray cache value {}: {}", key, e);
        }
    }
}

impl Cacher for LruCacher {
    fn get_ids(&self, table: &str, fingerprint: &str) -> Option<Vec<Pk>> {
        if !self.config.enabled {
            return None;
        }

        let key = ids_key(table, fingerprint);
        let mut ids = self.ids.lock();
        let now = Instant::now();

        let Some(last_access) = ids.last_access(table, fingerprint) else {
            self.drop_stray(&key);
            self.stats.record_miss();
            return None;
        };

        if now.saturating_duration_since(last_access) > self.config.ttl {
            if let Err(e) = self.del_ids_locked(&mut ids, table, fingerprint) {
                warn!("Failed to drop expired id-list {}: {}", key, e);
            }
            self.stats.record_expirations(1);
            self.stats.record_miss();
            self.stats.set_id_entries(ids.len() as u64);
            return None;
        }

        ids.touch(table, fingerprint, now);
        let result = match self.store.get(&key) {
            Ok(Some(CacheValue::Ids(bytes))) => match decode_pk_list(&bytes) {
                Ok(pks) => Some(pks),
                Err(e) => {
                    warn!("Dropping undecodable id-list {}: {}", key, e);
                    if let Err(e) = self.del_ids_locked(&mut ids, table, fingerprint) {
                        warn!("Failed to drop id-list {}: {}", key, e);
                    }
                    None
                }
            },
            Ok(Some(other)) => {
                warn!("Dropping id-list {} holding a {} value", key, other.kind());
                if let Err(e) = self.del_ids_locked(&mut ids, table, fingerprint) {
                    warn!("Failed to drop id-list {}: {}", key, e);
                }
                None
            }
            Ok(None) => {
                debug!("Id-list {} indexed but not stored, dropping index entry", key);
                ids.remove(table, fingerprint);
                None
            }
            Err(e) => {
                warn!("Id-list lookup {} failed: {}", key, e);
                None
            }
        };

        self.stats.set_id_entries(ids.len() as u64);
        if result.is_some() {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }
        result
    }

    fn put_ids(&self, table: &str, fingerprint: &str, pks: &[Pk]) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let bytes = encode_pk_list(pks)?;
        let key = ids_key(table, fingerprint);
        let mut ids = self.ids.lock();

        let created = ids.upsert(table, fingerprint, Instant::now());
        if let Err(e) = self.store.put(&key, CacheValue::Ids(bytes)) {
            if created {
                ids.remove(table, fingerprint);
            } else if let Err(del_err) = self.del_ids_locked(&mut ids, table, fingerprint) {
                warn!("Failed to drop stale id-list {}: {}", key, del_err);
            }
            return Err(CacheError::NotStored(format!("id-list {}: {}", key, e)));
        }
        debug!(table, fingerprint, count = pks.len(), "Cached id-list");

        if ids.len() > self.config.max_ids {
            if let Some(oldest) = ids.oldest() {
                if let Err(e) = self.del_ids_locked(&mut ids, &oldest.table, &oldest.key) {
                    warn!("Failed to evict id-list {}: {}", oldest.key, e);
                }
                self.stats.record_eviction();
            }
        }

        self.stats.set_id_entries(ids.len() as u64);
        Ok(())
    }

    fn del_ids(&self, table: &str, fingerprint: &str) -> Result<()> {
        let mut ids = self.ids.lock();
        let result = self.del_ids_locked(&mut ids, table, fingerprint);
        self.stats.record_invalidation();
        self.stats.set_id_entries(ids.len() as u64);
        result
    }

    fn clear_ids(&self, table: &str) -> Result<()> {
        let mut ids = self.ids.lock();
        debug!(table, count = ids.table_len(table), "Clearing id-lists");
        self.stats.record_invalidation();
        self.clear_ids_locked(&mut ids, table)
    }

    fn get_bean(&self, table: &str, id: &str) -> Option<CachedBean> {
        if !self.config.enabled {
            return None;
        }

        let key = bean_key(table, id);
        let mut beans = self.beans.lock();
        let now = Instant::now();

        let Some(last_access) = beans.last_access(table, id) else {
            self.drop_stray(&key);
            self.stats.record_miss();
            return None;
        };

        if now.saturating_duration_since(last_access) > self.config.ttl {
            if let Err(e) = self.del_bean_locked(&mut beans, table, id) {
                warn!("Failed to drop expired bean {}: {}", key, e);
            }
            self.stats.record_expirations(1);
            self.stats.record_miss();
            self.stats.set_bean_entries(beans.len() as u64);
            return None;
        }

        beans.touch(table, id, now);
        let result = match self.store.get(&key) {
            Ok(Some(CacheValue::Bean(bean))) => Some(bean),
            Ok(Some(other)) => {
                warn!("Dropping bean {} holding a {} value", key, other.kind());
                beans.remove(table, id);
                self.drop_stray(&key);
                None
            }
            Ok(None) => {
                debug!("Bean {} indexed but not stored, dropping index entry", key);
                beans.remove(table, id);
                None
            }
            Err(e) => {
                warn!("Bean lookup {} failed: {}", key, e);
                None
            }
        };

        self.stats.set_bean_entries(beans.len() as u64);
        if result.is_some() {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }
        result
    }

    fn put_bean(&self, table: &str, id: &str, bean: CachedBean) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let key = bean_key(table, id);
        let mut beans = self.beans.lock();

        let created = beans.upsert(table, id, Instant::now());
        if let Err(e) = self.store.put(&key, CacheValue::Bean(bean)) {
            beans.remove(table, id);
            if !created {
                self.drop_stray(&key);
            }
            return Err(CacheError::NotStored(format!("bean {}: {}", key, e)));
        }
        debug!(table, id, "Cached bean");

        if beans.len() > self.config.max_beans {
            if let Some(oldest) = beans.oldest() {
                if let Err(e) = self.del_bean_locked(&mut beans, &oldest.table, &oldest.key) {
                    warn!("Failed to evict bean {}: {}", oldest.key, e);
                }
                self.stats.record_eviction();
            }
        }

        self.stats.set_bean_entries(beans.len() as u64);
        Ok(())
    }

    fn del_bean(&self, table: &str, id: &str) -> Result<()> {
        let mut beans = self.beans.lock();
        debug!(table, id, "Deleting bean and clearing table id-lists");
        let result = self.del_bean_locked(&mut beans, table, id);
        self.stats.record_invalidation();
        self.stats.set_bean_entries(beans.len() as u64);
        result
    }

    fn clear_beans(&self, table: &str) -> Result<()> {
        let mut beans = self.beans.lock();
        debug!(table, count = beans.table_len(table), "Clearing beans");
        self.stats.record_invalidation();
        self.clear_beans_locked(&mut beans, table)
    }
}

impl std::fmt::Debug for LruCacher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCacher")
            .field("enabled", &self.config.enabled)
            .field("max_ids", &self.config.max_ids)
            .field("max_beans", &self.config.max_beans)
            .field("ttl", &self.config.ttl)
            .field("id_entries", &self.len_ids())
            .field("bean_entries", &self.len_beans())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cacher::{get_cache_sql, put_cache_sql};
    use crate::store::MemoryStore;
    use parking_lot::Mutex as PlMutex;
    use proptest::prelude::*;
    use query_core::Value;
    use std::collections::HashMap;
    use std::thread;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct User {
        id: i64,
        name: String,
    }

    fn user(id: i64) -> CachedBean {
        CachedBean::new(User {
            id,
            name: format!("user-{}", id),
        })
    }

    fn cacher_with(config: CacheConfig) -> (Arc<MemoryStore>, LruCacher) {
        let store = Arc::new(MemoryStore::new());
        let cacher = LruCacher::new(store.clone(), config).unwrap();
        (store, cacher)
    }

    fn pks(ids: &[i64]) -> Vec<Pk> {
        ids.iter().map(|id| Pk::from(*id)).collect()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let result = LruCacher::new(store, CacheConfig::default().with_max_beans(0));
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    #[test]
    fn test_put_get_bean() {
        let (_, cacher) = cacher_with(CacheConfig::default());
        cacher.put_bean("user", "1", user(1)).unwrap();

        let bean = cacher.get_bean("user", "1").expect("bean should be cached");
        assert_eq!(bean.downcast_ref::<User>().map(|u| u.id), Some(1));
        assert_eq!(cacher.stats().hits(), 1);
    }

    #[test]
    fn test_get_bean_miss() {
        let (_, cacher) = cacher_with(CacheConfig::default());
        assert!(cacher.get_bean("user", "404").is_none());
        assert_eq!(cacher.stats().misses(), 1);
    }

    #[test]
    fn test_put_get_ids() {
        let (_, cacher) = cacher_with(CacheConfig::default());
        cacher.put_ids("user", "q1", &pks(&[3, 1, 2])).unwrap();
        assert_eq!(cacher.get_ids("user", "q1"), Some(pks(&[3, 1, 2])));
        assert!(cacher.get_ids("user", "q2").is_none());
        assert!(cacher.get_ids("order", "q1").is_none());
    }

    #[test]
    fn test_put_overwrites_value() {
        let (store, cacher) = cacher_with(CacheConfig::default());
        cacher.put_ids("user", "q", &pks(&[1])).unwrap();
        cacher.put_ids("user", "q", &pks(&[1, 2])).unwrap();
        assert_eq!(cacher.get_ids("user", "q"), Some(pks(&[1, 2])));
        assert_eq!(cacher.len_ids(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_del_bean_clears_table_id_lists() {
        let (_, cacher) = cacher_with(CacheConfig::default());
        let fp = "SELECT * FROM user WHERE age>?-[18]";
        cacher.put_ids("user", fp, &pks(&[1, 2, 3])).unwrap();
        cacher.put_ids("user", "other-[]", &pks(&[4])).unwrap();
        cacher.put_ids("order", fp, &pks(&[9])).unwrap();
        cacher.put_bean("user", "2", user(2)).unwrap();

        assert_eq!(cacher.get_ids("user", fp), Some(pks(&[1, 2, 3])));

        cacher.del_bean("user", "2").unwrap();

        assert!(cacher.get_bean("user", "2").is_none());
        assert!(cacher.get_ids("user", fp).is_none());
        assert!(cacher.get_ids("user", "other-[]").is_none());
        assert_eq!(cacher.get_ids("order", fp), Some(pks(&[9])));
        assert!(cacher.check_consistency());
    }

    #[test]
    fn test_del_uncached_bean_still_clears_id_lists() {
        let (_, cacher) = cacher_with(CacheConfig::default());
        put_cache_sql(
            &cacher,
            &pks(&[1, 2, 3]),
            "user",
            "SELECT * FROM user WHERE age>?",
            &[Value::from(18)],
        )
        .unwrap();
        assert_eq!(
            get_cache_sql(&cacher, "user", "SELECT * FROM user WHERE age>?", &[Value::from(18)]),
            Some(pks(&[1, 2, 3]))
        );

        cacher.del_bean("user", "2").unwrap();

        assert!(
            get_cache_sql(&cacher, "user", "SELECT * FROM user WHERE age>?", &[Value::from(18)])
                .is_none()
        );
    }

    #[test]
    fn test_del_ids_and_clear() {
        let (store, cacher) = cacher_with(CacheConfig::default());
        cacher.put_ids("user", "a", &pks(&[1])).unwrap();
        cacher.put_ids("user", "b", &pks(&[2])).unwrap();
        cacher.put_ids("order", "a", &pks(&[3])).unwrap();

        cacher.del_ids("user", "a").unwrap();
        assert!(cacher.get_ids("user", "a").is_none());
        assert_eq!(cacher.len_ids(), 2);

        cacher.clear_ids("user").unwrap();
        assert!(cacher.get_ids("user", "b").is_none());
        assert_eq!(cacher.get_ids("order", "a"), Some(pks(&[3])));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_clear_beans_leaves_other_tables() {
        let (_, cacher) = cacher_with(CacheConfig::default());
        cacher.put_bean("user", "1", user(1)).unwrap();
        cacher.put_bean("user", "2", user(2)).unwrap();
        cacher.put_bean("order", "1", user(1)).unwrap();
        cacher.put_ids("user", "q", &pks(&[1, 2])).unwrap();

        cacher.clear_beans("user").unwrap();

        assert!(cacher.get_bean("user", "1").is_none());
        assert!(cacher.get_bean("user", "2").is_none());
        assert!(cacher.get_bean("order", "1").is_some());
        assert_eq!(cacher.get_ids("user", "q"), Some(pks(&[1, 2])));
        assert_eq!(cacher.len_beans(), 1);
    }

    #[test]
    fn test_lru_eviction_drops_least_recently_touched() {
        let (_, cacher) = cacher_with(CacheConfig::default().with_max_beans(3));
        for id in 1..=3 {
            cacher.put_bean("user", &id.to_string(), user(id)).unwrap();
        }

        // Touching 1 makes 2 the eviction candidate
        assert!(cacher.get_bean("user", "1").is_some());
        cacher.put_bean("user", "4", user(4)).unwrap();

        assert_eq!(cacher.len_beans(), 3);
        assert!(cacher.get_bean("user", "2").is_none());
        assert!(cacher.get_bean("user", "1").is_some());
        assert!(cacher.get_bean("user", "3").is_some());
        assert!(cacher.get_bean("user", "4").is_some());
        assert_eq!(cacher.stats().evictions(), 1);
    }

    #[test]
    fn test_lru_eviction_of_id_lists() {
        let (store, cacher) = cacher_with(CacheConfig::default().with_max_ids(2));
        cacher.put_ids("user", "a", &pks(&[1])).unwrap();
        cacher.put_ids("user", "b", &pks(&[2])).unwrap();
        cacher.put_ids("user", "c", &pks(&[3])).unwrap();

        assert_eq!(cacher.len_ids(), 2);
        assert!(cacher.get_ids("user", "a").is_none());
        assert!(!store.contains_key(&ids_key("user", "a")));
        assert!(cacher.check_consistency());
    }

    #[test]
    fn test_get_drops_stray_backend_value() {
        let (store, cacher) = cacher_with(CacheConfig::default());
        store
            .put(&bean_key("user", "7"), CacheValue::Bean(user(7)))
            .unwrap();

        assert!(cacher.get_bean("user", "7").is_none());
        assert!(!store.contains_key(&bean_key("user", "7")));
    }

    #[test]
    fn test_get_reconciles_missing_backend_value() {
        let (store, cacher) = cacher_with(CacheConfig::default());
        cacher.put_bean("user", "1", user(1)).unwrap();
        store.del(&bean_key("user", "1")).unwrap();

        assert!(cacher.get_bean("user", "1").is_none());
        assert_eq!(cacher.len_beans(), 0);
        assert!(cacher.check_consistency());
    }

    #[test]
    fn test_corrupt_id_list_is_a_miss() {
        let (store, cacher) = cacher_with(CacheConfig::default());
        cacher.put_ids("user", "q", &pks(&[1])).unwrap();
        store
            .put(&ids_key("user", "q"), CacheValue::Ids(vec![0xff, 0x00]))
            .unwrap();

        assert!(cacher.get_ids("user", "q").is_none());
        assert_eq!(cacher.len_ids(), 0);
        assert!(!store.contains_key(&ids_key("user", "q")));
    }

    #[test]
    fn test_cache_disabled() {
        let (store, cacher) = cacher_with(CacheConfig::disabled());
        cacher.put_bean("user", "1", user(1)).unwrap();
        cacher.put_ids("user", "q", &pks(&[1])).unwrap();

        assert!(cacher.get_bean("user", "1").is_none());
        assert!(cacher.get_ids("user", "q").is_none());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiration_on_read() {
        let config = CacheConfig::default().with_ttl(Duration::from_secs(60));
        let (store, cacher) = cacher_with(config);
        cacher.put_bean("user", "1", user(1)).unwrap();
        cacher.put_ids("user", "q", &pks(&[1])).unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cacher.get_ids("user", "q").is_some());

        tokio::time::advance(Duration::from_secs(31)).await;
        // The bean was last touched 61s ago, the id-list 31s ago
        assert!(cacher.get_bean("user", "1").is_none());
        assert!(store.is_empty(), "expired bean delete clears the table's id-lists");
        assert_eq!(cacher.stats().expirations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_id_list_expires_on_read() {
        let config = CacheConfig::default().with_ttl(Duration::from_secs(60));
        let (store, cacher) = cacher_with(config);
        cacher.put_ids("user", "q", &pks(&[1, 2])).unwrap();
        cacher.put_ids("user", "fresh", &pks(&[3])).unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cacher.get_ids("user", "fresh").is_some());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cacher.get_ids("user", "q").is_none());
        assert!(!store.contains_key(&ids_key("user", "q")));
        assert!(store.contains_key(&ids_key("user", "fresh")));
        assert_eq!(cacher.len_ids(), 1);

        let stats = cacher.stats();
        assert_eq!(stats.expirations(), 1);
        assert_eq!(stats.misses(), 1);
        assert_eq!(stats.hits(), 1);
    }

    #[test]
    fn test_colon_in_table_name_does_not_alias_keys() {
        let (store, cacher) = cacher_with(CacheConfig::default());
        cacher.put_bean("a:b", "1", user(1)).unwrap();
        cacher.put_bean("a", "b:1", user(2)).unwrap();
        assert_eq!(store.len(), 2);

        let bean = cacher.get_bean("a:b", "1").unwrap();
        assert_eq!(bean.downcast_ref::<User>().map(|u| u.id), Some(1));
        let bean = cacher.get_bean("a", "b:1").unwrap();
        assert_eq!(bean.downcast_ref::<User>().map(|u| u.id), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_refreshes_ttl() {
        let config = CacheConfig::default().with_ttl(Duration::from_secs(60));
        let (_, cacher) = cacher_with(config);
        cacher.put_bean("user", "1", user(1)).unwrap();

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(45)).await;
            assert!(cacher.get_bean("user", "1").is_some());
        }
    }

    #[test]
    fn test_sweep_removes_nothing_when_fresh() {
        let (_, cacher) = cacher_with(CacheConfig::default());
        cacher.put_bean("user", "1", user(1)).unwrap();
        let report = cacher.sweep();
        assert_eq!(report.total(), 0);
        assert_eq!(cacher.len_beans(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let config = CacheConfig::default()
            .with_ttl(Duration::from_secs(60))
            .with_max_removed_per_sweep(100);
        let (_, cacher) = cacher_with(config);

        for id in 0..5 {
            cacher.put_bean("user", &id.to_string(), user(id)).unwrap();
        }
        for id in 0..4 {
            cacher.put_ids("order", &format!("q{}", id), &pks(&[id])).unwrap();
        }
        tokio::time::advance(Duration::from_secs(40)).await;
        for id in 5..8 {
            cacher.put_bean("user", &id.to_string(), user(id)).unwrap();
        }
        cacher.put_ids("order", "fresh", &pks(&[1])).unwrap();
        tokio::time::advance(Duration::from_secs(21)).await;

        let report = cacher.sweep();
        assert_eq!(report.beans_removed, 5);
        assert_eq!(report.ids_removed, 4);
        assert_eq!(cacher.len_beans(), 3);
        assert_eq!(cacher.len_ids(), 1);
        for id in 5..8 {
            assert!(cacher.get_bean("user", &id.to_string()).is_some());
        }
        assert!(cacher.get_ids("order", "fresh").is_some());
        assert!(cacher.check_consistency());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_respects_cap() {
        let config = CacheConfig::default()
            .with_ttl(Duration::from_secs(10))
            .with_max_removed_per_sweep(3);
        let (_, cacher) = cacher_with(config);
        for id in 0..8 {
            cacher.put_bean("user", &id.to_string(), user(id)).unwrap();
        }
        tokio::time::advance(Duration::from_secs(11)).await;

        assert_eq!(cacher.sweep().beans_removed, 3);
        assert_eq!(cacher.len_beans(), 5);
        assert_eq!(cacher.sweep().beans_removed, 3);
        assert_eq!(cacher.sweep().beans_removed, 2);
        assert_eq!(cacher.sweep().beans_removed, 0);
        assert_eq!(cacher.len_beans(), 0);
        assert_eq!(cacher.stats().expirations(), 8);
    }

    #[test]
    fn test_concurrent_access() {
        let store = Arc::new(MemoryStore::new());
        let cacher = Arc::new(
            LruCacher::new(store, CacheConfig::default().with_max_entries(16)).unwrap(),
        );
        let mut handles = vec![];

        for t in 0..8i64 {
            let cacher = Arc::clone(&cacher);
            handles.push(thread::spawn(move || {
                for i in 0..200i64 {
                    let id = ((t * 7 + i) % 24).to_string();
                    match i % 5 {
                        0 => cacher.put_bean("user", &id, user(i)).unwrap(),
                        1 => {
                            cacher.get_bean("user", &id);
                        }
                        2 => cacher.put_ids("user", &format!("q{}", i % 9), &pks(&[i])).unwrap(),
                        3 => {
                            cacher.get_ids("user", &format!("q{}", i % 9));
                        }
                        _ => cacher.del_bean("user", &id).unwrap(),
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(cacher.check_consistency());
        assert!(cacher.len_beans() <= 16);
        assert!(cacher.len_ids() <= 16);
    }

    /// Store wrapper whose writes can be made to fail
    struct FlakyStore {
        inner: MemoryStore,
        fail_puts: PlMutex<bool>,
    }

    impl CacheStore for FlakyStore {
        fn put(&self, key: &str, value: CacheValue) -> Result<()> {
            if *self.fail_puts.lock() {
                return Err(CacheError::Backend("disk full".to_string()));
            }
            self.inner.put(key, value)
        }

        fn get(&self, key: &str) -> Result<Option<CacheValue>> {
            self.inner.get(key)
        }

        fn del(&self, key: &str) -> Result<()> {
            self.inner.del(key)
        }
    }

    #[test]
    fn test_failed_put_is_reported_and_not_indexed() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            fail_puts: PlMutex::new(false),
        });
        let cacher = LruCacher::new(store.clone(), CacheConfig::default()).unwrap();
        cacher.put_bean("user", "1", user(1)).unwrap();

        *store.fail_puts.lock() = true;
        let err = cacher.put_bean("user", "2", user(2)).unwrap_err();
        assert!(matches!(err, CacheError::NotStored(_)));
        let err = cacher.put_bean("user", "1", user(10)).unwrap_err();
        assert!(matches!(err, CacheError::NotStored(_)));

        assert_eq!(cacher.len_beans(), 0);
        assert!(cacher.get_bean("user", "1").is_none());
        assert!(cacher.check_consistency());
    }

    #[derive(Debug, Clone)]
    enum Op {
        PutBean(u8),
        GetBean(u8),
        DelBean(u8),
        PutIds(u8),
        GetIds(u8),
        ClearIds,
        ClearBeans,
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (0u8..12).prop_map(Op::PutBean),
            4 => (0u8..12).prop_map(Op::GetBean),
            2 => (0u8..12).prop_map(Op::DelBean),
            4 => (0u8..12).prop_map(Op::PutIds),
            4 => (0u8..12).prop_map(Op::GetIds),
            1 => Just(Op::ClearIds),
            1 => Just(Op::ClearBeans),
        ]
    }

    fn apply(cacher: &LruCacher, table: &str, op: &Op) {
        match op {
            Op::PutBean(id) => cacher
                .put_bean(table, &id.to_string(), user(i64::from(*id)))
                .unwrap(),
            Op::GetBean(id) => {
                if let Some(bean) = cacher.get_bean(table, &id.to_string()) {
                    assert_eq!(bean.downcast_ref::<User>().map(|u| u.id), Some(i64::from(*id)));
                }
            }
            Op::DelBean(id) => cacher.del_bean(table, &id.to_string()).unwrap(),
            Op::PutIds(q) => cacher
                .put_ids(table, &format!("q{}", q), &pks(&[i64::from(*q), 0]))
                .unwrap(),
            Op::GetIds(q) => {
                if let Some(ids) = cacher.get_ids(table, &format!("q{}", q)) {
                    assert_eq!(ids, pks(&[i64::from(*q), 0]));
                }
            }
            Op::ClearIds => cacher.clear_ids(table).unwrap(),
            Op::ClearBeans => cacher.clear_beans(table).unwrap(),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn index_and_sequence_stay_consistent_under_interleaving(
            threads in prop::collection::vec(prop::collection::vec(arb_op(), 1..60), 2..5)
        ) {
            let store = Arc::new(MemoryStore::new());
            let cacher = LruCacher::new(
                store.clone(),
                CacheConfig::default().with_max_entries(6),
            ).unwrap();
            let tables = ["user", "order"];

            thread::scope(|scope| {
                for (i, ops) in threads.iter().enumerate() {
                    let cacher = &cacher;
                    let table = tables[i % tables.len()];
                    scope.spawn(move || {
                        for op in ops {
                            apply(cacher, table, op);
                            assert!(cacher.check_consistency());
                        }
                    });
                }
            });

            prop_assert!(cacher.check_consistency());
            prop_assert_eq!(store.len(), cacher.len_ids() + cacher.len_beans());
        }

        #[test]
        fn single_caller_matches_model_without_bounds(ops in prop::collection::vec(arb_op(), 1..80)) {
            let (_, cacher) = cacher_with(CacheConfig::default());
            let mut beans: HashMap<u8, ()> = HashMap::new();
            let mut ids: HashMap<u8, ()> = HashMap::new();

            for op in &ops {
                apply(&cacher, "user", op);
                match op {
                    Op::PutBean(id) => { beans.insert(*id, ()); }
                    Op::DelBean(id) => { beans.remove(id); ids.clear(); }
                    Op::PutIds(q) => { ids.insert(*q, ()); }
                    Op::ClearIds => ids.clear(),
                    Op::ClearBeans => beans.clear(),
                    Op::GetBean(_) | Op::GetIds(_) => {}
                }
                prop_assert_eq!(cacher.len_beans(), beans.len());
                prop_assert_eq!(cacher.len_ids(), ids.len());
            }
        }
    }
}
