//! Query-Result and Entity Cache
//!
//! This crate caches the two things a data-access layer fetches over and over:
//! the ordered primary keys a query returned (id-lists) and the rows those
//! keys point at (beans).
//!
//! # Features
//!
//! - **LRU Eviction**: Each cache kind is bounded; inserting past the bound evicts the least recently used entry
//! - **TTL Support**: Entries idle for longer than the TTL are misses and get removed
//! - **Expiry Sweeper**: Optional background task dropping expired entries in small batches
//! - **Table Invalidation**: Deleting a bean drops every id-list of its table
//! - **Pluggable Storage**: [`CacheStore`] for the LRU cacher, [`RemoteStore`] for networked backends
//! - **Redis**: [`RedisStore`] behind the `redis` feature
//! - **Statistics**: Track hits, misses, evictions and expirations
//!
//! # Example
//!
//! ```ignore
//! use query_cache::{get_cache_sql, put_cache_sql, CacheConfig, Cacher, LruCacher, MemoryStore};
//! use std::sync::Arc;
//!
//! let cacher = Arc::new(LruCacher::new(Arc::new(MemoryStore::new()), CacheConfig::default())?);
//! let _sweeper = cacher.start_sweeper()?;
//!
//! // Check the cache before running the query
//! if let Some(ids) = get_cache_sql(cacher.as_ref(), "user", sql, &args) {
//!     return Ok(ids);
//! }
//!
//! // Run the query and cache the primary keys it produced
//! let ids = db.query_ids(sql, &args)?;
//! put_cache_sql(cacher.as_ref(), &ids, "user", sql, &args)?;
//! ```

pub mod cacher;
pub mod config;
pub mod key;
pub mod lru_cacher;
mod recency;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod registry;
pub mod remote;
pub mod stats;
pub mod store;
pub mod sweeper;
pub mod value;

pub use cacher::{get_cache_sql, put_cache_sql, Cacher, NoOpCacher};
pub use config::{CacheConfig, RedisConfig, RemoteCacheConfig};
pub use key::{bean_key, decode_pk_list, encode_pk_list, fingerprint, fingerprint_digest, ids_key};
pub use lru_cacher::LruCacher;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use registry::TypeRegistry;
pub use remote::{Expiration, RemoteCacher, RemoteStore};
pub use stats::CacheStats;
pub use store::{CacheStore, MemoryStore};
pub use sweeper::{SweepReport, SweeperHandle};
pub use value::{CacheValue, CachedBean};
