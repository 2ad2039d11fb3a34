//! Collaborator traits and cache statistics.
//!
//! The cache core owns no IO of its own. It talks to four collaborators:
//!
//! - [`UserApi`]: the remote API, which owns retry and timeout policy
//! - [`LocalStore`]: a synchronous string key/value store that survives
//!   restarts
//! - [`QueryCache`]: the in-memory query cache keyed by composite keys
//! - [`Session`]: login state plus a token-changed signal

use async_trait::async_trait;
use roster_core::{CacheEntry, CachePolicy, QueryKey, RosterResult, SessionId};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::watch;

/// Options for a single API read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    /// Ask intermediaries not to serve a cached response.
    pub no_cache: bool,
    /// Retries on top of the first attempt.
    pub retries: u32,
    pub timeout: Duration,
    /// Query-string parameters.
    pub params: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn from_policy(policy: &CachePolicy) -> Self {
        Self {
            no_cache: false,
            retries: policy.retries,
            timeout: policy.request_timeout,
            params: Vec::new(),
        }
    }

    pub fn with_no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::from_policy(&CachePolicy::default())
    }
}

/// Remote API collaborator.
///
/// Implementations apply `options.retries` and `options.timeout` themselves;
/// the cache never retries on its own.
#[async_trait]
pub trait UserApi: Send + Sync {
    /// Fetch the raw JSON payload at `path`.
    async fn get(&self, path: &str, options: &RequestOptions) -> RosterResult<Value>;
}

/// Persisted local store collaborator.
///
/// Synchronous by contract: implementations are expected to be fast enough
/// to call from async code without yielding.
pub trait LocalStore: Send + Sync {
    fn get_item(&self, key: &str) -> RosterResult<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> RosterResult<()>;

    fn remove_item(&self, key: &str) -> RosterResult<()>;
}

/// Query-cache collaborator.
pub trait QueryCache: Send + Sync {
    fn get_query_data(&self, key: &QueryKey) -> Option<CacheEntry>;

    fn set_query_data(&self, key: QueryKey, value: CacheEntry);

    /// Drop every entry whose key starts with `prefix`. Returns how many
    /// entries were dropped.
    fn invalidate_queries(&self, prefix: &QueryKey) -> usize;
}

/// Auth state published by a [`Session`].
///
/// A `watch` channel only keeps the latest value, so a logout followed by a
/// login with the same token would be invisible from the token alone.
/// `logouts` counts every logout and survives that coalescing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthSignal {
    /// `None` means the token was removed.
    pub token: Option<String>,
    pub logouts: u64,
}

impl AuthSignal {
    pub fn new(token: Option<String>, logouts: u64) -> Self {
        Self { token, logouts }
    }

    /// True if moving from `self` to `next` ends the current user's session.
    pub fn loses_session_to(&self, next: &AuthSignal) -> bool {
        self.token.is_some() && (self.logouts != next.logouts || self.token != next.token)
    }
}

/// Session/auth collaborator.
pub trait Session: Send + Sync {
    fn is_logged_in(&self) -> bool;

    fn session_id(&self) -> Option<SessionId>;

    /// Auth-changed signal.
    fn subscribe(&self) -> watch::Receiver<AuthSignal>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads served by the query-cache tier.
    pub query_hits: u64,
    /// Reads served by the manager's in-memory tier.
    pub manager_hits: u64,
    /// Reads served by the persisted store.
    pub store_hits: u64,
    /// Reads that missed every tier.
    pub misses: u64,
    /// Network fetches actually started.
    pub fetches: u64,
    /// Callers that joined an in-flight fetch instead of starting one.
    pub joins: u64,
    /// Forced refreshes skipped by the cooldown or an active request.
    pub throttled: u64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.query_hits + self.manager_hits + self.store_hits
    }

    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_signal_session_loss() {
        let signed_in = AuthSignal::new(Some("t-1".to_string()), 0);

        assert!(signed_in.loses_session_to(&AuthSignal::new(None, 1)));
        assert!(signed_in.loses_session_to(&AuthSignal::new(Some("t-2".to_string()), 0)));
        // Logout then login with the same token, coalesced into one update.
        assert!(signed_in.loses_session_to(&AuthSignal::new(Some("t-1".to_string()), 1)));
        assert!(!signed_in.loses_session_to(&signed_in.clone()));
        assert!(!AuthSignal::new(None, 1).loses_session_to(&AuthSignal::new(Some("t-1".to_string()), 1)));
    }

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            query_hits: 50,
            manager_hits: 20,
            store_hits: 10,
            misses: 20,
            ..Default::default()
        };
        assert_eq!(stats.hits(), 80);
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_request_options_from_policy() {
        let policy = CachePolicy::new()
            .with_retries(5)
            .with_request_timeout(Duration::from_secs(3));
        let options = RequestOptions::from_policy(&policy)
            .with_no_cache(true)
            .with_param("include", "profile");

        assert!(options.no_cache);
        assert_eq!(options.retries, 5);
        assert_eq!(options.timeout, Duration::from_secs(3));
        assert_eq!(options.params, vec![("include".to_string(), "profile".to_string())]);
    }

    #[test]
    fn test_default_request_options_use_default_policy() {
        let options = RequestOptions::default();
        assert!(!options.no_cache);
        assert_eq!(options.retries, 2);
        assert_eq!(options.timeout, Duration::from_millis(12_000));
    }
}
