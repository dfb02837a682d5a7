//! Remote Cache Example
//!
//! Plugs a custom backend into `RemoteCacher` and shows registered bean types,
//! per-put expiration and namespace flushing.

use anyhow::Result;
use query_cache::{
    CachedBean, Cacher, Expiration, RemoteCacheConfig, RemoteCacher, RemoteStore, TypeRegistry,
};
use query_core::{CacheError, Pk};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Product {
    id: u64,
    name: String,
    price_cents: u64,
}

/// Toy backend: keys never expire and scans support a trailing `*` only
#[derive(Default)]
struct MapStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MapStore {
    fn lock(&self) -> query_core::Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|_| CacheError::Backend("store lock poisoned".to_string()))
    }
}

impl RemoteStore for MapStore {
    fn get(&self, key: &str) -> query_core::Result<Option<Vec<u8>>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> query_core::Result<()> {
        println!("  SET {} ({} bytes, ttl {:?})", key, value.len(), ttl);
        self.lock()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn del(&self, key: &str) -> query_core::Result<bool> {
        Ok(self.lock()?.remove(key).is_some())
    }

    fn scan(&self, pattern: &str) -> query_core::Result<Vec<String>> {
        let prefix = pattern.trim_end_matches('*').replace('\\', "");
        Ok(self
            .lock()?
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .cloned()
            .collect())
    }
}

fn main() -> Result<()> {
    println!("=== Remote Cache Example ===\n");

    let registry = TypeRegistry::new().with_type::<Product>("shop.product")?;
    let config = RemoteCacheConfig::default()
        .with_key_prefix("shop")
        .with_default_expiration(Some(Duration::from_secs(600)));
    let cacher = RemoteCacher::new(MapStore::default(), registry, config)?;

    let product = Product {
        id: 7,
        name: "Keyboard".to_string(),
        price_cents: 4_999,
    };

    println!("Caching a product with the default expiration:");
    cacher.put_bean("product", "7", CachedBean::new(product.clone()))?;

    println!("Caching an id-list that never expires:");
    cacher.put_ids_with("product", "cheap-[]", &[Pk::from(7)], Expiration::Never)?;

    if let Some(bean) = cacher.get_bean("product", "7") {
        println!("\nCache HIT: {:?}", bean.downcast_ref::<Product>());
    }

    // Types missing from the registry cannot leave the process
    match cacher.put_bean("product", "8", CachedBean::new("not registered")) {
        Err(e) => println!("Rejected as expected: {}", e),
        Ok(()) => println!("Unexpectedly stored an unregistered type"),
    }

    println!("\nFlushed {} keys", cacher.flush()?);
    println!("After flush: {:?}", cacher.get_ids("product", "cheap-[]"));

    println!("\n=== Remote cache example completed! ===");
    Ok(())
}
