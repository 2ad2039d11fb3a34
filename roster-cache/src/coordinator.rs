//! Single-flight request coordination.
//!
//! At most one fetch per [`CacheKey`] is in flight. The first caller's fetch
//! is spawned onto the runtime and stored as a shared future; callers that
//! arrive before it settles await the same future and observe the same
//! value or the same error.
//!
//! # Settlement
//!
//! The spawned task removes its in-flight entry and stamps the registry
//! *before* it yields its result, so by the time any caller sees the value a
//! new call for the key starts a new fetch. The task runs to completion even
//! if every caller is dropped.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use roster_core::{CacheKey, ConsumerId, FetchError, RosterResult, UserRecord};
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::registry::RouteRegistry;

type SharedFetch = Shared<BoxFuture<'static, RosterResult<UserRecord>>>;

/// The single outstanding fetch for a key.
struct InFlight {
    /// Guards removal: only the fetch that inserted the entry may remove it.
    fetch_id: Uuid,
    started_at: Instant,
    future: SharedFetch,
}

/// How a caller's request was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestRole {
    /// The caller started the fetch.
    Leader,
    /// The caller joined a fetch already in flight.
    Follower,
}

/// Single-flight coordinator over an in-flight map.
pub struct RequestCoordinator {
    in_flight: Arc<DashMap<CacheKey, InFlight>>,
    registry: Arc<RouteRegistry>,
}

impl RequestCoordinator {
    pub fn new(registry: Arc<RouteRegistry>) -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<RouteRegistry> {
        &self.registry
    }

    /// Run `fetch_fn` for `key` unless a fetch for `key` is already in
    /// flight, in which case await that one instead.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn coordinate_request<F, Fut>(
        &self,
        key: &CacheKey,
        consumer: &ConsumerId,
        fetch_fn: F,
    ) -> RosterResult<UserRecord>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RosterResult<UserRecord>> + Send + 'static,
    {
        let (_, result) = self.coordinate_with_role(key, consumer, fetch_fn).await;
        result
    }

    /// Same as [`coordinate_request`](Self::coordinate_request), also
    /// reporting whether this caller started the fetch.
    pub async fn coordinate_with_role<F, Fut>(
        &self,
        key: &CacheKey,
        consumer: &ConsumerId,
        fetch_fn: F,
    ) -> (RequestRole, RosterResult<UserRecord>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RosterResult<UserRecord>> + Send + 'static,
    {
        let (role, future) = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                debug!(key = %key, consumer = %consumer, "Joining in-flight request");
                (RequestRole::Follower, entry.get().future.clone())
            }
            Entry::Vacant(entry) => {
                let fetch_id = Uuid::now_v7();
                info!(key = %key, consumer = %consumer, %fetch_id, "Starting fetch");
                let future = self.spawn_fetch(key.clone(), fetch_id, fetch_fn());
                entry.insert(InFlight {
                    fetch_id,
                    started_at: Instant::now(),
                    future: future.clone(),
                });
                (RequestRole::Leader, future)
            }
        };

        (role, future.await)
    }

    fn spawn_fetch<Fut>(&self, key: CacheKey, fetch_id: Uuid, fetch: Fut) -> SharedFetch
    where
        Fut: Future<Output = RosterResult<UserRecord>> + Send + 'static,
    {
        let in_flight = Arc::clone(&self.in_flight);
        let registry = Arc::clone(&self.registry);
        let task_key = key.clone();

        let handle = tokio::spawn(async move {
            let result = fetch.await;
            in_flight.remove_if(&task_key, |_, entry| entry.fetch_id == fetch_id);
            match &result {
                Ok(_) => {
                    registry.mark_completed(&task_key);
                    info!(key = %task_key, %fetch_id, "Fetch settled");
                }
                Err(err) => warn!(key = %task_key, %fetch_id, error = %err, "Fetch failed"),
            }
            result
        });

        let in_flight = Arc::clone(&self.in_flight);
        async move {
            match handle.await {
                Ok(result) => result,
                Err(join_err) => {
                    // The task never reached its own cleanup.
                    in_flight.remove_if(&key, |_, entry| entry.fetch_id == fetch_id);
                    Err(FetchError::Aborted {
                        key: key.to_string(),
                        reason: join_err.to_string(),
                    }
                    .into())
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Whether a fetch for `key` is currently in flight.
    pub fn get_active_request(&self, key: &CacheKey) -> bool {
        self.in_flight.contains_key(key)
    }

    /// When the in-flight fetch for `key` started, if any.
    pub fn started_at(&self, key: &CacheKey) -> Option<Instant> {
        self.in_flight.get(key).map(|entry| entry.started_at)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// True if a successful fetch for `key` finished inside the cooldown.
    pub fn should_throttle_request(&self, key: &CacheKey) -> bool {
        self.registry.should_throttle_request(key)
    }

    /// Detach every in-flight fetch. Running fetches still complete, but new
    /// callers no longer join them.
    pub(crate) fn forget_all(&self) {
        self.in_flight.clear();
    }
}
