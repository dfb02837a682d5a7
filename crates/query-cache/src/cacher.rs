//! The cache contract used by the data-access layer
//!
//! Table names, fingerprints and bean ids are opaque strings chosen by the
//! caller. Reads return `None` on a miss and never fail: a backend or decoding
//! problem on the read path is logged and reported as a miss. Writes and
//! invalidations return their error so the caller can decide whether to go on
//! without caching.

use crate::key::fingerprint;
use crate::value::CachedBean;
use query_core::{Pk, Result, Value};

/// Id-list and bean cache consumed by the data-access layer
pub trait Cacher: Send + Sync {
    /// Ordered primary keys cached for a query fingerprint
    fn get_ids(&self, table: &str, fingerprint: &str) -> Option<Vec<Pk>>;

    /// Cache the primary keys a query produced
    fn put_ids(&self, table: &str, fingerprint: &str, ids: &[Pk]) -> Result<()>;

    /// Drop one cached id-list
    fn del_ids(&self, table: &str, fingerprint: &str) -> Result<()>;

    /// Drop every cached id-list of a table
    fn clear_ids(&self, table: &str) -> Result<()>;

    /// Cached row for a bean id
    fn get_bean(&self, table: &str, id: &str) -> Option<CachedBean>;

    /// Cache a row
    fn put_bean(&self, table: &str, id: &str, bean: CachedBean) -> Result<()>;

    /// Drop one cached row.
    ///
    /// Any id-list of the table may reference the row, so every id-list of
    /// the table is dropped as well.
    fn del_bean(&self, table: &str, id: &str) -> Result<()>;

    /// Drop every cached row of a table
    fn clear_beans(&self, table: &str) -> Result<()>;
}

/// Look up the cached primary keys for a statement and its bound arguments
pub fn get_cache_sql<C: Cacher + ?Sized>(
    cacher: &C,
    table: &str,
    sql: &str,
    args: &[Value],
) -> Option<Vec<Pk>> {
    cacher.get_ids(table, &fingerprint(sql, args))
}

/// Cache the primary keys a statement produced
pub fn put_cache_sql<C: Cacher + ?Sized>(
    cacher: &C,
    ids: &[Pk],
    table: &str,
    sql: &str,
    args: &[Value],
) -> Result<()> {
    cacher.put_ids(table, &fingerprint(sql, args), ids)
}

/// A cacher that stores nothing and always misses
#[derive(Debug, Default, Clone)]
pub struct NoOpCacher;

impl Cacher for NoOpCacher {
    fn get_ids(&self, _table: &str, _fingerprint: &str) -> Option<Vec<Pk>> {
        None
    }

    fn put_ids(&self, _table: &str, _fingerprint: &str, _ids: &[Pk]) -> Result<()> {
        Ok(())
    }

    fn del_ids(&self, _table: &str, _fingerprint: &str) -> Result<()> {
        Ok(())
    }

    fn clear_ids(&self, _table: &str) -> Result<()> {
        Ok(())
    }

    fn get_bean(&self, _table: &str, _id: &str) -> Option<CachedBean> {
        None
    }

    fn put_bean(&self, _table: &str, _id: &str, _bean: CachedBean) -> Result<()> {
        Ok(())
    }

    fn del_bean(&self, _table: &str, _id: &str) -> Result<()> {
        Ok(())
    }

    fn clear_beans(&self, _table: &str) -> Result<()> {
        Ok(())
    }
}
