//! Read results carrying their provenance.
//!
//! Every read through the layered cache says which tier answered and, when
//! known, when the value was fetched from the network. Callers that only
//! want the record call [`CacheRead::into_value`].

use chrono::Utc;
use roster_core::Timestamp;
use std::fmt;
use std::time::Duration;

/// Where a read was served from, in fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// The shared query cache, keyed by route and session.
    QueryCache,
    /// The manager's own per-route entries.
    Manager,
    /// The local store; survives restarts but keeps no fetch time.
    PersistedStore,
    /// A fetch that just settled.
    Network,
}

impl Tier {
    /// True for every tier except [`Tier::Network`].
    pub fn is_cache(&self) -> bool {
        !matches!(self, Self::Network)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::QueryCache => "query_cache",
            Self::Manager => "manager",
            Self::PersistedStore => "persisted_store",
            Self::Network => "network",
        };
        f.write_str(name)
    }
}

/// Result of a read, carrying provenance metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead<T> {
    value: T,
    /// `None` for the persisted store, which keeps only the record.
    fetched_at: Option<Timestamp>,
    tier: Tier,
}

impl<T> CacheRead<T> {
    /// A value served by one of the cache tiers.
    pub fn from_tier(value: T, tier: Tier, fetched_at: Option<Timestamp>) -> Self {
        Self {
            value,
            fetched_at,
            tier,
        }
    }

    /// A value fetched from the network just now.
    pub fn from_network(value: T) -> Self {
        Self {
            value,
            fetched_at: Some(Utc::now()),
            tier: Tier::Network,
        }
    }

    /// Consume the read, keeping only the value.
    pub fn into_value(self) -> T {
        self.value
    }

    /// Borrow the value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// The tier that answered.
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// When the value came off the network, if known.
    pub fn fetched_at(&self) -> Option<Timestamp> {
        self.fetched_at
    }

    /// True if a cache tier answered rather than the network.
    pub fn was_cache_hit(&self) -> bool {
        self.tier.is_cache()
    }

    /// Time since the value was fetched, if the fetch time is known.
    pub fn staleness(&self) -> Option<Duration> {
        let fetched_at = self.fetched_at?;
        Some(
            Utc::now()
                .signed_duration_since(fetched_at)
                .to_std()
                .unwrap_or(Duration::ZERO),
        )
    }

    /// True if the value was fetched at or after `timestamp`.
    pub fn is_fresh_as_of(&self, timestamp: Timestamp) -> bool {
        self.fetched_at.is_some_and(|at| at >= timestamp)
    }

    /// Transform the value, keeping tier and fetch time.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            fetched_at: self.fetched_at,
            tier: self.tier,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_from_tier() {
        let fetched_at = Utc::now();
        let read = CacheRead::from_tier("value", Tier::Manager, Some(fetched_at));

        assert!(read.was_cache_hit());
        assert_eq!(read.tier(), Tier::Manager);
        assert_eq!(read.fetched_at(), Some(fetched_at));
        assert_eq!(read.into_value(), "value");
    }

    #[test]
    fn test_read_from_network_is_not_a_hit() {
        let read = CacheRead::from_network(42);
        assert!(!read.was_cache_hit());
        assert!(read.staleness().unwrap() < Duration::from_secs(5));
    }

    #[test]
    fn test_persisted_read_has_unknown_staleness() {
        let read = CacheRead::from_tier("value", Tier::PersistedStore, None);
        assert_eq!(read.staleness(), None);
        assert!(!read.is_fresh_as_of(Utc::now() - chrono::Duration::days(1)));
    }

    #[test]
    fn test_read_staleness() {
        let past = Utc::now() - chrono::Duration::seconds(5);
        let read = CacheRead::from_tier("test", Tier::QueryCache, Some(past));

        let staleness = read.staleness().unwrap();
        assert!(staleness >= Duration::from_secs(4));
        assert!(staleness <= Duration::from_secs(10));
        assert!(read.is_fresh_as_of(past));
        assert!(!read.is_fresh_as_of(past + chrono::Duration::seconds(10)));
    }

    #[test]
    fn test_read_map_keeps_metadata() {
        let read = CacheRead::from_tier(42, Tier::PersistedStore, None).map(|v| v.to_string());
        assert_eq!(read.tier(), Tier::PersistedStore);
        assert_eq!(read.into_value(), "42");
    }

    #[test]
    fn test_tier_display() {
        assert_eq!(Tier::QueryCache.to_string(), "query_cache");
        assert_eq!(Tier::Network.to_string(), "network");
    }
}
