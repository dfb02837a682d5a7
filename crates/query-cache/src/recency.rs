//! Recency bookkeeping for one cache kind
//!
//! The sequence is an unbounded [`LruCache`] of last-access times, most
//! recent first; the index groups its keys per table so a whole table can be
//! dropped without scanning the sequence. Every key is in both or in neither.

use ahash::{AHashMap, AHashSet, RandomState};
use lru::LruCache;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct EntryKey {
    pub table: String,
    pub key: String,
}

impl EntryKey {
    pub fn new(table: &str, key: &str) -> Self {
        Self {
            table: table.to_string(),
            key: key.to_string(),
        }
    }
}

pub(crate) struct RecencyIndex {
    sequence: LruCache<EntryKey, Instant, RandomState>,
    index: AHashMap<String, AHashSet<String>>,
}

impl RecencyIndex {
    pub fn new() -> Self {
        Self {
            sequence: LruCache::unbounded_with_hasher(RandomState::new()),
            index: AHashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn table_len(&self, table: &str) -> usize {
        self.index.get(table).map_or(0, |keys| keys.len())
    }

    /// Last access of an entry, without touching it
    pub fn last_access(&self, table: &str, key: &str) -> Option<Instant> {
        self.sequence.peek(&EntryKey::new(table, key)).copied()
    }

    /// Refresh an existing entry and move it to the newest end
    pub fn touch(&mut self, table: &str, key: &str, now: Instant) -> bool {
        match self.sequence.get_mut(&EntryKey::new(table, key)) {
            Some(last_access) => {
                *last_access = now;
                true
            }
            None => false,
        }
    }

    /// Touch the entry, creating it at the newest end if absent.
    /// Returns whether it was created.
    pub fn upsert(&mut self, table: &str, key: &str, now: Instant) -> bool {
        if self.touch(table, key, now) {
            return false;
        }
        self.sequence.push(EntryKey::new(table, key), now);
        self.index
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string());
        true
    }

    pub fn remove(&mut self, table: &str, key: &str) -> bool {
        let removed = self.sequence.pop(&EntryKey::new(table, key)).is_some();
        if let Some(keys) = self.index.get_mut(table) {
            keys.remove(key);
            if keys.is_empty() {
                self.index.remove(table);
            }
        }
        removed
    }

    /// Remove every entry of a table, returning the removed keys
    pub fn take_table(&mut self, table: &str) -> Vec<String> {
        let keys: Vec<String> = self
            .index
            .remove(table)
            .map(|keys| keys.into_iter().collect())
            .unwrap_or_default();
        for key in &keys {
            self.sequence.pop(&EntryKey::new(table, key));
        }
        keys
    }

    pub fn oldest(&self) -> Option<EntryKey> {
        self.sequence.peek_lru().map(|(key, _)| key.clone())
    }

    /// The oldest entry, if it has been idle for longer than `ttl`
    pub fn oldest_expired(&self, now: Instant, ttl: Duration) -> Option<EntryKey> {
        match self.sequence.peek_lru() {
            Some((key, last_access)) if now.saturating_duration_since(*last_access) > ttl => {
                Some(key.clone())
            }
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn keys_oldest_first(&self) -> Vec<EntryKey> {
        self.sequence.iter().rev().map(|(key, _)| key.clone()).collect()
    }

    /// Index and sequence hold the same keys, and the sequence is ordered by last access
    pub fn is_consistent(&self) -> bool {
        let indexed: usize = self.index.values().map(|keys| keys.len()).sum();
        if indexed != self.sequence.len() {
            return false;
        }

        let all_indexed = self.sequence.iter().all(|(entry, _)| {
            self.index
                .get(&entry.table)
                .is_some_and(|keys| keys.contains(&entry.key))
        });

        let mut previous: Option<Instant> = None;
        let ordered = self.sequence.iter().rev().all(|(_, last_access)| {
            let in_order = previous.map_or(true, |p| p <= *last_access);
            previous = Some(*last_access);
            in_order
        });

        all_indexed && ordered
    }
}
