//! Explicit per-session context.
//!
//! A [`UserDataContext`] owns one [`UserDataManager`] and the session
//! watcher task that clears it on auth loss. Create one per session, hand it
//! around behind an `Arc`, and call [`UserDataContext::dispose`] when done.

use roster_core::{CacheKey, CachePolicy, RosterResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::consumer::UserDataHandle;
use crate::manager::UserDataManager;
use crate::query_cache::InMemoryQueryCache;
use crate::session::spawn_session_watcher;
use crate::traits::{LocalStore, QueryCache, Session, UserApi};

/// The collaborators a context is built from.
#[derive(Clone)]
pub struct Collaborators {
    pub api: Arc<dyn UserApi>,
    pub store: Arc<dyn LocalStore>,
    pub query_cache: Arc<dyn QueryCache>,
    pub session: Arc<dyn Session>,
}

impl Collaborators {
    /// Collaborators with a fresh in-memory query cache.
    pub fn new(
        api: Arc<dyn UserApi>,
        store: Arc<dyn LocalStore>,
        session: Arc<dyn Session>,
    ) -> Self {
        Self {
            api,
            store,
            query_cache: Arc::new(InMemoryQueryCache::new()),
            session,
        }
    }

    pub fn with_query_cache(mut self, query_cache: Arc<dyn QueryCache>) -> Self {
        self.query_cache = query_cache;
        self
    }
}

pub struct UserDataContext {
    manager: Arc<UserDataManager>,
    watcher: JoinHandle<()>,
    disposed: AtomicBool,
}

impl UserDataContext {
    /// Validate `policy`, build the manager and start the session watcher.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn create(collaborators: Collaborators, policy: CachePolicy) -> RosterResult<Self> {
        policy.validate()?;

        let signals = collaborators.session.subscribe();
        let manager = Arc::new(UserDataManager::new(
            collaborators.api,
            collaborators.store,
            collaborators.query_cache,
            collaborators.session,
            policy,
        ));
        let watcher = spawn_session_watcher(Arc::clone(&manager), signals);
        info!(route = %manager.policy().default_route, "User data context created");

        Ok(Self {
            manager,
            watcher,
            disposed: AtomicBool::new(false),
        })
    }

    pub fn manager(&self) -> &Arc<UserDataManager> {
        &self.manager
    }

    /// Mount a consumer on `route`.
    pub fn mount(&self, route: impl Into<CacheKey>) -> UserDataHandle {
        UserDataHandle::mount(Arc::clone(&self.manager), route.into())
    }

    /// Mount a consumer on the policy's default route.
    pub fn mount_default(&self) -> UserDataHandle {
        let route = self.manager.policy().default_route.clone();
        UserDataHandle::mount(Arc::clone(&self.manager), route)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Stop the session watcher and drop in-memory state. Idempotent.
    ///
    /// The persisted store keeps its copy so the next context starts warm.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.watcher.abort();
        self.manager.release();
        info!("User data context disposed");
    }
}

impl Drop for UserDataContext {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}
