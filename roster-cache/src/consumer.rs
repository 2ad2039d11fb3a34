//! Consumer handles.
//!
//! A [`UserDataHandle`] is one logical view of a route's user data. It is
//! registered with the route registry for as long as it lives and walks a
//! small load state machine:
//!
//! ```text
//! InitialLoading -> Ready                       (cache hit)
//! InitialLoading -> Fetching -> Ready | Error   (cache miss)
//! Ready -> Refetching -> Ready                  (refetch, error flag on failure)
//! ```
//!
//! A failed refetch keeps the previous record and reports the failure
//! through [`UserDataHandle::stale_error`].

use roster_core::{CacheKey, ConsumerId, RosterError, UserRecord};
use std::sync::Arc;
use tracing::debug;

use crate::manager::{GetUserDataOptions, UserDataManager};

/// Where a handle is in its load lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    /// Mounted, nothing read yet.
    InitialLoading,
    /// Every tier missed, waiting on the network.
    Fetching,
    Ready,
    /// Holding data while a forced refresh runs.
    Refetching,
    /// The first load failed; there is no data.
    Error(RosterError),
}

impl LoadState {
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::InitialLoading | Self::Fetching)
    }
}

/// A mounted consumer of one route.
pub struct UserDataHandle {
    manager: Arc<UserDataManager>,
    route: CacheKey,
    consumer: ConsumerId,
    state: LoadState,
    data: Option<UserRecord>,
    stale_error: Option<RosterError>,
}

impl std::fmt::Debug for UserDataHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserDataHandle")
            .field("route", &self.route)
            .field("consumer", &self.consumer)
            .field("state", &self.state)
            .field("data", &self.data)
            .field("stale_error", &self.stale_error)
            .finish_non_exhaustive()
    }
}

impl UserDataHandle {
    /// Register a new consumer for `route`.
    pub fn mount(manager: Arc<UserDataManager>, route: CacheKey) -> Self {
        let consumer = ConsumerId::generate();
        manager.register_route_user(&route, &consumer);
        debug!(key = %route, consumer = %consumer, "Consumer mounted");
        Self {
            manager,
            route,
            consumer,
            state: LoadState::InitialLoading,
            data: None,
            stale_error: None,
        }
    }

    /// Initial load: serve from cache when possible, otherwise fetch.
    pub async fn load(&mut self) -> &LoadState {
        if !self.manager.session().is_logged_in() {
            self.fail(RosterError::AuthLoss);
            return &self.state;
        }

        if let Some(record) = self.manager.get_cached_user_data_for(&self.route) {
            self.settle(record);
            return &self.state;
        }

        // The tiers were just read; going through them again would count a
        // second miss.
        self.state = LoadState::Fetching;
        let options = GetUserDataOptions::for_route(self.route.clone())
            .with_consumer(self.consumer.clone())
            .without_cache();
        match self.manager.get_user_data(options).await {
            Ok(Some(record)) => self.settle(record),
            // Only a logged-out session yields nothing on a plain read.
            Ok(None) => self.fail(RosterError::AuthLoss),
            Err(err) => self.fail(err),
        }
        &self.state
    }

    /// Force a refresh, keeping current data on failure.
    ///
    /// A handle without data falls back to [`load`](Self::load).
    pub async fn refetch(&mut self) -> &LoadState {
        if self.data.is_none() {
            return self.load().await;
        }

        self.state = LoadState::Refetching;
        let options = GetUserDataOptions::for_route(self.route.clone())
            .with_consumer(self.consumer.clone())
            .force_refresh();
        match self.manager.get_user_data(options).await {
            Ok(Some(record)) => self.settle(record),
            Ok(None) if !self.manager.session().is_logged_in() => {
                self.data = None;
                self.fail(RosterError::AuthLoss);
            }
            // Throttled with nothing cached: keep what we have.
            Ok(None) => self.state = LoadState::Ready,
            Err(err) => {
                debug!(key = %self.route, consumer = %self.consumer, error = %err, "Refetch failed, keeping data");
                self.stale_error = Some(err);
                self.state = LoadState::Ready;
            }
        }
        &self.state
    }

    fn settle(&mut self, record: UserRecord) {
        self.data = Some(record);
        self.stale_error = None;
        self.state = LoadState::Ready;
    }

    fn fail(&mut self, err: RosterError) {
        self.stale_error = None;
        self.state = LoadState::Error(err);
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn data(&self) -> Option<&UserRecord> {
        self.data.as_ref()
    }

    /// Error from the last failed refetch, while older data is still shown.
    pub fn stale_error(&self) -> Option<&RosterError> {
        self.stale_error.as_ref()
    }

    pub fn error(&self) -> Option<&RosterError> {
        match &self.state {
            LoadState::Error(err) => Some(err),
            _ => self.stale_error.as_ref(),
        }
    }

    pub fn route(&self) -> &CacheKey {
        &self.route
    }

    pub fn consumer(&self) -> &ConsumerId {
        &self.consumer
    }
}

impl Drop for UserDataHandle {
    fn drop(&mut self) {
        self.manager
            .unregister_route_user(&self.route, &self.consumer);
        debug!(key = %self.route, consumer = %self.consumer, "Consumer unmounted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_cache::InMemoryQueryCache;
    use crate::session::StaticSession;
    use crate::store::MemoryStore;
    use crate::traits::{RequestOptions, UserApi};
    use async_trait::async_trait;
    use roster_core::{CachePolicy, FetchError, RosterResult};
    use serde_json::{json, Value};
    use std::sync::Mutex;

    struct ScriptedApi {
        responses: Mutex<Vec<RosterResult<Value>>>,
    }

    #[async_trait]
    impl UserApi for ScriptedApi {
        async fn get(&self, _path: &str, _options: &RequestOptions) -> RosterResult<Value> {
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                responses.remove(0)
            } else {
                responses[0].clone()
            }
        }
    }

    fn offline() -> RosterResult<Value> {
        Err(FetchError::Transport {
            path: "/api/me".to_string(),
            reason: "offline".to_string(),
        }
        .into())
    }

    fn manager(
        session: Arc<StaticSession>,
        responses: Vec<RosterResult<Value>>,
    ) -> Arc<UserDataManager> {
        Arc::new(UserDataManager::new(
            Arc::new(ScriptedApi {
                responses: Mutex::new(responses),
            }),
            Arc::new(MemoryStore::new()),
            Arc::new(InMemoryQueryCache::new()),
            session,
            CachePolicy::default(),
        ))
    }

    fn me() -> CacheKey {
        CacheKey::from("/api/me")
    }

    #[tokio::test]
    async fn test_mount_registers_and_drop_unregisters() {
        let manager = manager(Arc::new(StaticSession::logged_in("t", "s")), vec![offline()]);
        let handle = UserDataHandle::mount(Arc::clone(&manager), me());
        assert_eq!(manager.registry().consumer_count(&me()), 1);
        assert_eq!(handle.state(), &LoadState::InitialLoading);
        assert!(handle.consumer().as_str().starts_with("consumer-"));

        drop(handle);
        assert_eq!(manager.registry().consumer_count(&me()), 0);
    }

    #[tokio::test]
    async fn test_load_fetches_then_second_handle_hits_cache() {
        let manager = manager(
            Arc::new(StaticSession::logged_in("t", "s")),
            vec![Ok(json!({ "id": 7, "firstName": "Ada" }))],
        );

        let mut first = UserDataHandle::mount(Arc::clone(&manager), me());
        assert_eq!(first.load().await, &LoadState::Ready);
        assert_eq!(first.data().unwrap().first_name, "Ada");
        assert_eq!(manager.stats().misses, 1);

        let mut second = UserDataHandle::mount(Arc::clone(&manager), me());
        assert_eq!(second.load().await, &LoadState::Ready);
        assert_eq!(manager.stats().fetches, 1);
        assert_eq!(manager.stats().query_hits, 1);
    }

    #[tokio::test]
    async fn test_failed_first_load_is_error() {
        let manager = manager(Arc::new(StaticSession::logged_in("t", "s")), vec![offline()]);
        let mut handle = UserDataHandle::mount(manager, me());

        assert!(matches!(handle.load().await, LoadState::Error(RosterError::Fetch(_))));
        assert!(handle.data().is_none());
        assert!(handle.error().is_some());
    }

    #[tokio::test]
    async fn test_failed_refetch_keeps_data() {
        let manager = manager(
            Arc::new(StaticSession::logged_in("t", "s")),
            vec![Ok(json!({ "id": 7, "email": "ada@example.com" })), offline()],
        );
        let mut handle = UserDataHandle::mount(Arc::clone(&manager), me());
        handle.load().await;
        // Past the cooldown so the forced refresh actually fetches.
        manager.registry().reset_completions();

        assert_eq!(handle.refetch().await, &LoadState::Ready);
        assert_eq!(handle.data().unwrap().email, "ada@example.com");
        assert!(matches!(handle.stale_error(), Some(RosterError::Fetch(_))));
    }

    #[tokio::test]
    async fn test_logged_out_load_reports_auth_loss() {
        let manager = manager(Arc::new(StaticSession::logged_out()), vec![offline()]);
        let mut handle = UserDataHandle::mount(manager, me());
        assert_eq!(handle.load().await, &LoadState::Error(RosterError::AuthLoss));
    }
}
