//! In-process cache for dropdown lists (categories, customers, couriers).
//!
//! Entries are invalidated, not refreshed, after master-data writes; the
//! cache is deliberately outside the write transactions and only ever
//! eventually consistent with them.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// One row of a dropdown list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdName {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
struct CachedEntry {
    stored_at: Instant,
    rows: Vec<IdName>,
}

/// TTL'd lookup cache keyed by entity kind.
#[derive(Debug)]
pub struct LookupCache {
    entries: DashMap<&'static str, CachedEntry>,
    ttl: Duration,
}

impl LookupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Returns the cached rows for `key` unless the entry has expired.
    pub fn get(&self, key: &'static str) -> Option<Vec<IdName>> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() <= self.ttl => {
                return Some(entry.rows.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    pub fn put(&self, key: &'static str, rows: Vec<IdName>) {
        self.entries.insert(
            key,
            CachedEntry {
                stored_at: Instant::now(),
                rows,
            },
        );
    }

    /// Drops the entry for `key`; the next read repopulates from storage.
    pub fn invalidate(&self, key: &'static str) {
        self.entries.remove(key);
    }
}

impl Default for LookupCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}
