//! Query Caching Example
//!
//! Demonstrates id-list and bean caching, table invalidation, TTL expiry and statistics.

use anyhow::Result;
use query_cache::{
    get_cache_sql, put_cache_sql, CacheConfig, CachedBean, Cacher, LruCacher, MemoryStore,
};
use query_core::{Pk, Value};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct User {
    id: i64,
    name: String,
    age: i64,
}

fn users() -> Vec<User> {
    vec![
        User {
            id: 1,
            name: "Alice".to_string(),
            age: 34,
        },
        User {
            id: 2,
            name: "Bob".to_string(),
            age: 17,
        },
        User {
            id: 3,
            name: "Charlie".to_string(),
            age: 52,
        },
    ]
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Query Caching Example ===\n");

    // Example 1: Basic cache operations
    basic_caching()?;

    // Example 2: Bean delete invalidates the table's id-lists
    table_invalidation()?;

    // Example 3: TTL expiry with the background sweeper
    cache_with_ttl().await?;

    println!("\n=== All caching examples completed! ===");
    Ok(())
}

/// Example 1: Cache the ids a query returned, then the rows behind them
fn basic_caching() -> Result<()> {
    println!("--- Example 1: Basic Caching ---\n");

    let cacher = LruCacher::new(Arc::new(MemoryStore::new()), CacheConfig::default())?;
    let sql = "SELECT id FROM user WHERE age > ?";
    let args = [Value::from(18)];

    // Miss: run the "query" and cache its primary keys
    if get_cache_sql(&cacher, "user", sql, &args).is_none() {
        let ids: Vec<Pk> = users()
            .iter()
            .filter(|u| u.age > 18)
            .map(|u| Pk::from(u.id))
            .collect();
        println!("Cache MISS, caching {} ids", ids.len());
        put_cache_sql(&cacher, &ids, "user", sql, &args)?;
    }

    // Hit: load every row through the bean cache
    if let Some(ids) = get_cache_sql(&cacher, "user", sql, &args) {
        println!("Cache HIT! {} ids", ids.len());
        for pk in &ids {
            let id = pk.cache_id();
            let user = match cacher.get_bean("user", &id) {
                Some(bean) => bean.downcast::<User>(),
                None => {
                    let all = users();
                    let user = all.into_iter().find(|u| Pk::from(u.id) == *pk);
                    if let Some(user) = &user {
                        cacher.put_bean("user", &id, CachedBean::new(user.clone()))?;
                    }
                    user.map(Arc::new)
                }
            };
            if let Some(user) = user {
                println!("  {} -> {} ({})", id, user.name, user.age);
            }
        }
    }

    let stats = cacher.stats();
    println!(
        "\nHits: {}, misses: {}, hit rate: {:.1}%",
        stats.hits(),
        stats.misses(),
        stats.hit_rate() * 100.0
    );

    Ok(())
}

/// Example 2: Deleting one bean drops every cached id-list of its table
fn table_invalidation() -> Result<()> {
    println!("\n--- Example 2: Table Invalidation ---\n");

    let cacher = LruCacher::new(Arc::new(MemoryStore::new()), CacheConfig::default())?;
    let fingerprint = "SELECT * FROM user WHERE age>?-[18]";
    cacher.put_ids("user", fingerprint, &[Pk::from(1), Pk::from(2), Pk::from(3)])?;
    cacher.put_ids("order", fingerprint, &[Pk::from(9)])?;

    println!("Before delete: user ids = {:?}", cacher.get_ids("user", fingerprint));

    cacher.del_bean("user", "2")?;

    println!("After delete:  user ids = {:?}", cacher.get_ids("user", fingerprint));
    println!("Other tables untouched: order ids = {:?}", cacher.get_ids("order", fingerprint));

    Ok(())
}

/// Example 3: Entries idle past the TTL are removed by the sweeper
async fn cache_with_ttl() -> Result<()> {
    println!("\n--- Example 3: TTL and Sweeper ---\n");

    let config = CacheConfig::default()
        .with_ttl(Duration::from_secs(1))
        .with_sweep_interval(Duration::from_millis(500))
        .with_max_removed_per_sweep(10);
    let cacher = Arc::new(LruCacher::new(Arc::new(MemoryStore::new()), config)?);
    let sweeper = cacher.start_sweeper()?;

    for user in users() {
        cacher.put_bean("user", &user.id.to_string(), CachedBean::new(user))?;
    }
    println!("Cached {} beans with a 1s TTL", cacher.len_beans());

    tokio::time::sleep(Duration::from_millis(2_200)).await;
    println!("After 2.2s: {} beans left", cacher.len_beans());
    println!("Expirations recorded: {}", cacher.stats().expirations());

    sweeper.shutdown().await;
    Ok(())
}
