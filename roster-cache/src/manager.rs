//! Layered user-data cache.
//!
//! Reads go through three tiers in a fixed order:
//!
//! 1. the query cache, keyed by `(route, session)`
//! 2. the manager's own in-memory entries, keyed by route
//! 3. the persisted local store, holding the last record as JSON
//!
//! The first hit wins. When every tier misses, or the caller forces a
//! refresh, the read goes to the network through the
//! [`RequestCoordinator`], and the settled record is written to all three
//! tiers before any caller sees it.
//!
//! # Writers
//!
//! Tiers are only written by the fetch settlement path ([`TierWriter`]) and
//! only cleared by [`UserDataManager::clear`]. Each clear bumps an epoch;
//! a fetch that started before the clear settles without writing, so a
//! logout can never be undone by a late response. The epoch sits behind a
//! lock: a settling fetch holds the read side across its epoch check and
//! all three writes, and a clear holds the write side while it bumps the
//! epoch and empties the tiers.

use dashmap::DashMap;
use roster_core::{
    normalize, CacheEntry, CacheKey, CachePolicy, ConsumerId, QueryKey, RosterError,
    RosterResult, UserRecord,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::coordinator::{RequestCoordinator, RequestRole};
use crate::read::{CacheRead, Tier};
use crate::registry::RouteRegistry;
use crate::traits::{CacheStats, LocalStore, QueryCache, RequestOptions, Session, UserApi};

/// Consumer id used when a read does not name its consumer.
const ANONYMOUS_CONSUMER: &str = "user-data-manager";

/// Options for [`UserDataManager::get_user_data`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetUserDataOptions {
    /// Route to read. Defaults to the policy's default route.
    pub route_key: Option<CacheKey>,
    /// Skip the cache tiers and go to the network, subject to throttling.
    pub force_refresh: bool,
    /// Consult the cache tiers before the network.
    pub use_cache: bool,
    /// Consumer issuing the read, for coordination logs.
    pub consumer: Option<ConsumerId>,
}

impl Default for GetUserDataOptions {
    fn default() -> Self {
        Self {
            route_key: None,
            force_refresh: false,
            use_cache: true,
            consumer: None,
        }
    }
}

impl GetUserDataOptions {
    /// Cached read of the default route.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached read of `route`.
    pub fn for_route(route: impl Into<CacheKey>) -> Self {
        Self {
            route_key: Some(route.into()),
            ..Self::default()
        }
    }

    /// Go to the network unless the route is throttled or already fetching.
    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    /// Skip the tiers but still join an in-flight fetch.
    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn with_consumer(mut self, consumer: ConsumerId) -> Self {
        self.consumer = Some(consumer);
        self
    }
}

#[derive(Debug, Default)]
struct StatsCounters {
    query_hits: AtomicU64,
    manager_hits: AtomicU64,
    store_hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    joins: AtomicU64,
    throttled: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            query_hits: self.query_hits.load(Ordering::Relaxed),
            manager_hits: self.manager_hits.load(Ordering::Relaxed),
            store_hits: self.store_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            joins: self.joins.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
        }
    }
}

/// The single writer of all three tiers.
#[derive(Clone)]
struct TierWriter {
    query_cache: Arc<dyn QueryCache>,
    entries: Arc<DashMap<CacheKey, CacheEntry>>,
    store: Arc<dyn LocalStore>,
    persisted_key: String,
    epoch: Arc<RwLock<u64>>,
}

impl TierWriter {
    fn current_epoch(&self) -> u64 {
        *self.epoch.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write `entry` to every tier unless a clear happened since `epoch`.
    ///
    /// A clear cannot start until this returns.
    fn write(&self, route: &CacheKey, query_key: QueryKey, entry: &CacheEntry, epoch: u64) -> bool {
        let current = self.epoch.read().unwrap_or_else(PoisonError::into_inner);
        if *current != epoch {
            info!(key = %route, "Cache cleared during fetch, dropping result");
            return false;
        }

        self.query_cache.set_query_data(query_key, entry.clone());
        self.entries.insert(route.clone(), entry.clone());

        // The persisted copy is best effort; memory tiers already hold the value.
        match serde_json::to_string(&entry.data) {
            Ok(json) => {
                if let Err(err) = self.store.set_item(&self.persisted_key, &json) {
                    warn!(key = %route, error = %err, "Failed to persist user data");
                }
            }
            Err(err) => warn!(key = %route, error = %err, "Failed to serialize user data"),
        }
        true
    }

    /// Start a new epoch and run `invalidate` with every writer excluded.
    fn invalidate<R>(&self, invalidate: impl FnOnce() -> R) -> R {
        let mut epoch = self.epoch.write().unwrap_or_else(PoisonError::into_inner);
        *epoch += 1;
        invalidate()
    }
}

/// Everything a network fetch needs, detached from the manager so the
/// spawned fetch can outlive the caller.
struct FetchJob {
    api: Arc<dyn UserApi>,
    writer: TierWriter,
    route: CacheKey,
    query_key: QueryKey,
    options: RequestOptions,
    epoch: u64,
}

impl FetchJob {
    async fn run(self) -> RosterResult<UserRecord> {
        let raw = self.api.get(self.route.as_str(), &self.options).await?;
        let entry = CacheEntry::fetched_now(normalize(&raw));
        self.writer
            .write(&self.route, self.query_key, &entry, self.epoch);
        Ok(entry.data)
    }
}

/// Layered cache over the query cache, the manager tier and the persisted
/// store, with single-flight network fallback.
pub struct UserDataManager {
    api: Arc<dyn UserApi>,
    session: Arc<dyn Session>,
    registry: Arc<RouteRegistry>,
    coordinator: RequestCoordinator,
    writer: TierWriter,
    policy: CachePolicy,
    stats: StatsCounters,
}

impl UserDataManager {
    pub fn new(
        api: Arc<dyn UserApi>,
        store: Arc<dyn LocalStore>,
        query_cache: Arc<dyn QueryCache>,
        session: Arc<dyn Session>,
        policy: CachePolicy,
    ) -> Self {
        let registry = Arc::new(RouteRegistry::new(policy.throttle_window));
        let coordinator = RequestCoordinator::new(Arc::clone(&registry));
        let writer = TierWriter {
            query_cache,
            entries: Arc::new(DashMap::new()),
            store,
            persisted_key: policy.persisted_key.clone(),
            epoch: Arc::new(RwLock::new(0)),
        };
        Self {
            api,
            session,
            registry,
            coordinator,
            writer,
            policy,
            stats: StatsCounters::default(),
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn registry(&self) -> &Arc<RouteRegistry> {
        &self.registry
    }

    pub fn coordinator(&self) -> &RequestCoordinator {
        &self.coordinator
    }

    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    /// Snapshot of hit, miss and fetch counters since creation.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    pub fn register_route_user(&self, key: &CacheKey, consumer: &ConsumerId) -> bool {
        self.registry.register_route_user(key, consumer)
    }

    pub fn unregister_route_user(&self, key: &CacheKey, consumer: &ConsumerId) -> bool {
        self.registry.unregister_route_user(key, consumer)
    }

    pub fn get_active_request(&self, key: &CacheKey) -> bool {
        self.coordinator.get_active_request(key)
    }

    pub fn should_throttle_request(&self, key: &CacheKey) -> bool {
        self.coordinator.should_throttle_request(key)
    }

    /// Read user data for a route, returning only the record.
    pub async fn get_user_data(
        &self,
        options: GetUserDataOptions,
    ) -> RosterResult<Option<UserRecord>> {
        Ok(self
            .read_user_data(options)
            .await?
            .map(CacheRead::into_value))
    }

    /// Read user data for a route with provenance.
    ///
    /// Returns `Ok(None)` when no user is logged in, and when a forced
    /// refresh is skipped with nothing cached for the route.
    pub async fn read_user_data(
        &self,
        options: GetUserDataOptions,
    ) -> RosterResult<Option<CacheRead<UserRecord>>> {
        let route = options
            .route_key
            .unwrap_or_else(|| self.policy.default_route.clone());
        let consumer = options
            .consumer
            .unwrap_or_else(|| ConsumerId::new(ANONYMOUS_CONSUMER));

        if !self.session.is_logged_in() {
            debug!(key = %route, "No session, skipping user data read");
            return Ok(None);
        }

        if options.use_cache && !options.force_refresh {
            if let Some(read) = self.read_tiers(&route) {
                return Ok(Some(read));
            }
        }

        if options.force_refresh
            && (self.get_active_request(&route) || self.should_throttle_request(&route))
        {
            StatsCounters::bump(&self.stats.throttled);
            debug!(key = %route, consumer = %consumer, "Forced refresh throttled");
            return Ok(self.read_tiers(&route));
        }

        let job = FetchJob {
            api: Arc::clone(&self.api),
            writer: self.writer.clone(),
            route: route.clone(),
            query_key: self.query_key(&route),
            options: RequestOptions::from_policy(&self.policy).with_no_cache(options.force_refresh),
            epoch: self.writer.current_epoch(),
        };

        let (role, result) = self
            .coordinator
            .coordinate_with_role(&route, &consumer, move || job.run())
            .await;
        match role {
            RequestRole::Leader => StatsCounters::bump(&self.stats.fetches),
            RequestRole::Follower => StatsCounters::bump(&self.stats.joins),
        }

        result.map(|record| Some(CacheRead::from_network(record)))
    }

    /// Synchronous read of the default route across all tiers. Never touches
    /// the network.
    pub fn get_cached_user_data(&self) -> Option<UserRecord> {
        self.get_cached_user_data_for(&self.policy.default_route)
    }

    /// Like [`get_cached_user_data`](Self::get_cached_user_data) for any route.
    pub fn get_cached_user_data_for(&self, route: &CacheKey) -> Option<UserRecord> {
        self.read_tiers(route).map(CacheRead::into_value)
    }

    /// Invalidate every tier and forget throttling and in-flight state.
    ///
    /// The query cache is invalidated as a whole, including routes this
    /// manager never wrote. Waits for any write already in progress.
    pub fn clear(&self) {
        let writer = &self.writer;
        let removed = writer.invalidate(|| {
            let removed = writer.query_cache.invalidate_queries(&QueryKey::all());
            writer.entries.clear();
            if let Err(err) = writer.store.remove_item(&writer.persisted_key) {
                warn!(error = %err, "Failed to remove persisted user data");
            }
            removed
        });
        self.registry.reset_completions();
        self.coordinator.forget_all();
        info!(queries = removed, "User data cleared");
    }

    /// Drop in-memory state at the end of the context's life. The persisted
    /// store is left as is.
    pub(crate) fn release(&self) {
        self.writer.invalidate(|| self.writer.entries.clear());
        self.registry.clear();
        self.coordinator.forget_all();
    }

    fn query_key(&self, route: &CacheKey) -> QueryKey {
        QueryKey::new(route, self.session.session_id().as_ref())
    }

    fn read_tiers(&self, route: &CacheKey) -> Option<CacheRead<UserRecord>> {
        if let Some(entry) = self.writer.query_cache.get_query_data(&self.query_key(route)) {
            StatsCounters::bump(&self.stats.query_hits);
            debug!(key = %route, tier = %Tier::QueryCache, "Cache hit");
            return Some(CacheRead::from_tier(entry.data, Tier::QueryCache, Some(entry.fetched_at)));
        }

        if let Some(entry) = self.writer.entries.get(route).map(|entry| entry.clone()) {
            StatsCounters::bump(&self.stats.manager_hits);
            debug!(key = %route, tier = %Tier::Manager, "Cache hit");
            return Some(CacheRead::from_tier(entry.data, Tier::Manager, Some(entry.fetched_at)));
        }

        if let Some(record) = self.read_persisted() {
            StatsCounters::bump(&self.stats.store_hits);
            debug!(key = %route, tier = %Tier::PersistedStore, "Cache hit");
            return Some(CacheRead::from_tier(record, Tier::PersistedStore, None));
        }

        StatsCounters::bump(&self.stats.misses);
        debug!(key = %route, "Cache miss");
        None
    }

    /// Parse failures and store errors both count as a miss.
    fn read_persisted(&self) -> Option<UserRecord> {
        let key = &self.writer.persisted_key;
        let raw = match self.writer.store.get_item(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(key = %key, error = %err, "Persisted store read failed");
                return None;
            }
        };

        match serde_json::from_str::<UserRecord>(&raw) {
            Ok(record) => Some(record),
            Err(err) => {
                let err = RosterError::MalformedCache {
                    key: key.clone(),
                    reason: err.to_string(),
                };
                warn!(error = %err, "Ignoring persisted user data");
                None
            }
        }
    }
}
