//! Storage backends for the LRU cacher
//!
//! A [`CacheStore`] is a plain key/value primitive. It knows nothing about
//! recency, size bounds or expiry; [`LruCacher`](crate::LruCacher) keeps that
//! bookkeeping and only ever asks the store to put, get and delete payloads.

use crate::value::CacheValue;
use dashmap::DashMap;
use query_core::Result;

/// Key/value backend used by [`LruCacher`](crate::LruCacher)
pub trait CacheStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value
    fn put(&self, key: &str, value: CacheValue) -> Result<()>;

    /// Fetch the value under `key`; `Ok(None)` is a miss
    fn get(&self, key: &str) -> Result<Option<CacheValue>>;

    /// Remove `key`; removing an absent key is not an error
    fn del(&self, key: &str) -> Result<()>;
}

/// In-process store backed by a concurrent map
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, CacheValue>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored payloads
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

impl CacheStore for MemoryStore {
    fn put(&self, key: &str, value: CacheValue) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn del(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::CachedBean;

    #[test]
    fn test_put_get_overwrite() {
        let store = MemoryStore::new();
        store.put("a", CacheValue::Ids(vec![1])).unwrap();
        store.put("a", CacheValue::Ids(vec![2])).unwrap();

        match store.get("a").unwrap() {
            Some(CacheValue::Ids(bytes)) => assert_eq!(bytes, vec![2]),
            other => panic!("unexpected value: {:?}", other),
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_missing_is_none() {
        let store = MemoryStore::new();
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_del_is_idempotent() {
        let store = MemoryStore::new();
        store.put("b", CacheValue::Bean(CachedBean::new(1u8))).unwrap();
        store.del("b").unwrap();
        store.del("b").unwrap();
        assert!(store.is_empty());
        assert!(!store.contains_key("b"));
    }
}
