//! In-memory query cache keyed by composite `[route, session, ...]` keys.
//!
//! Invalidation works on key prefixes: `[route]` drops every session's entry
//! for a route, and [`QueryKey::all`] drops everything.

use dashmap::DashMap;
use roster_core::{CacheEntry, QueryKey};

use crate::traits::QueryCache;

/// [`QueryCache`] over a concurrent map.
///
/// Safe to share between managers; each manager's `clear` empties it.
#[derive(Debug, Default)]
pub struct InMemoryQueryCache {
    entries: DashMap<QueryKey, CacheEntry>,
}

impl InMemoryQueryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached queries across all routes and sessions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no query is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl QueryCache for InMemoryQueryCache {
    fn get_query_data(&self, key: &QueryKey) -> Option<CacheEntry> {
        self.entries.get(key).map(|entry| entry.clone())
    }

    fn set_query_data(&self, key: QueryKey, value: CacheEntry) {
        self.entries.insert(key, value);
    }

    /// Remove every entry whose key starts with `prefix`, returning how many
    /// were removed.
    fn invalidate_queries(&self, prefix: &QueryKey) -> usize {
        let mut removed = 0;
        self.entries.retain(|key, _| {
            let keep = !key.starts_with(prefix);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_core::{CacheKey, SessionId, UserRecord};

    fn entry(email: &str) -> CacheEntry {
        CacheEntry::fetched_now(UserRecord {
            email: email.to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_set_then_get() {
        let cache = InMemoryQueryCache::new();
        let key = QueryKey::new(&CacheKey::from("/api/me"), Some(&SessionId::new("s1")));
        assert!(cache.get_query_data(&key).is_none());

        cache.set_query_data(key.clone(), entry("a@b.c"));
        assert_eq!(cache.get_query_data(&key).unwrap().data.email, "a@b.c");
    }

    #[test]
    fn test_invalidate_by_route_prefix() {
        let cache = InMemoryQueryCache::new();
        let me = CacheKey::from("/api/me");
        let profile = CacheKey::from("/profile/consolidated");
        cache.set_query_data(QueryKey::new(&me, Some(&SessionId::new("s1"))), entry("a"));
        cache.set_query_data(QueryKey::new(&me, Some(&SessionId::new("s2"))), entry("b"));
        cache.set_query_data(QueryKey::new(&profile, Some(&SessionId::new("s1"))), entry("c"));

        assert_eq!(cache.invalidate_queries(&QueryKey::route_prefix(&me)), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.invalidate_queries(&QueryKey::route_prefix(&me)), 0);
    }
}
