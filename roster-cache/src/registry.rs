//! Route consumer registry.
//!
//! Tracks which consumers depend on which route keys and when each key last
//! completed a successful fetch. The completion stamps drive the forced
//! refresh cooldown.

use dashmap::DashMap;
use roster_core::{CacheKey, ConsumerId};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

/// Reference-counted consumer sets keyed by route.
#[derive(Debug)]
pub struct RouteRegistry {
    consumers: DashMap<CacheKey, HashSet<ConsumerId>>,
    completed: DashMap<CacheKey, Instant>,
    throttle_window: Duration,
}

impl RouteRegistry {
    pub fn new(throttle_window: Duration) -> Self {
        Self {
            consumers: DashMap::new(),
            completed: DashMap::new(),
            throttle_window,
        }
    }

    /// Register `consumer` for `key`. Returns false if it was already there.
    pub fn register_route_user(&self, key: &CacheKey, consumer: &ConsumerId) -> bool {
        self.consumers
            .entry(key.clone())
            .or_default()
            .insert(consumer.clone())
    }

    /// Unregister `consumer` from `key`. Returns false if it was not there.
    pub fn unregister_route_user(&self, key: &CacheKey, consumer: &ConsumerId) -> bool {
        let removed = match self.consumers.get_mut(key) {
            Some(mut set) => set.remove(consumer),
            None => return false,
        };
        // The shard guard above is released before this second lookup.
        self.consumers.remove_if(key, |_, set| set.is_empty());
        removed
    }

    pub fn consumers(&self, key: &CacheKey) -> Vec<ConsumerId> {
        self.consumers
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn consumer_count(&self, key: &CacheKey) -> usize {
        self.consumers.get(key).map_or(0, |set| set.len())
    }

    pub fn has_consumers(&self, key: &CacheKey) -> bool {
        self.consumer_count(key) > 0
    }

    /// Number of routes with at least one consumer.
    pub fn route_count(&self) -> usize {
        self.consumers.len()
    }

    /// Record a successful fetch for `key`. Only the coordinator's
    /// settlement path calls this.
    pub(crate) fn mark_completed(&self, key: &CacheKey) {
        self.completed.insert(key.clone(), Instant::now());
    }

    pub fn last_completed(&self, key: &CacheKey) -> Option<Instant> {
        self.completed.get(key).map(|at| *at)
    }

    /// True if a successful fetch for `key` finished less than the cooldown
    /// window ago.
    pub fn should_throttle_request(&self, key: &CacheKey) -> bool {
        self.last_completed(key)
            .is_some_and(|at| at.elapsed() < self.throttle_window)
    }

    pub fn throttle_window(&self) -> Duration {
        self.throttle_window
    }

    /// Forget every completion stamp so the next forced refresh fetches.
    pub(crate) fn reset_completions(&self) {
        self.completed.clear();
    }

    /// Drop all consumers and completion stamps.
    pub(crate) fn clear(&self) {
        self.consumers.clear();
        self.completed.clear();
    }
}

impl Default for RouteRegistry {
    fn default() -> Self {
        Self::new(roster_core::DEFAULT_THROTTLE_WINDOW)
    }
}
