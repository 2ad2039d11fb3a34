//! ROSTER Cache - Single-Flight User Data Cache
//!
//! Layered read path over a query cache, an in-memory manager tier and a
//! persisted local store, with at most one network fetch per route in flight.
//! Collaborators (API, store, query cache, session) are traits so the core
//! owns no IO of its own.

pub mod consumer;
pub mod context;
pub mod coordinator;
pub mod manager;
pub mod query_cache;
pub mod read;
pub mod registry;
pub mod session;
pub mod store;
pub mod traits;

pub use consumer::{LoadState, UserDataHandle};
pub use context::{Collaborators, UserDataContext};
pub use coordinator::{RequestCoordinator, RequestRole};
pub use manager::{GetUserDataOptions, UserDataManager};
pub use query_cache::InMemoryQueryCache;
pub use read::{CacheRead, Tier};
pub use registry::RouteRegistry;
pub use session::{spawn_session_watcher, StaticSession};
pub use store::{FileStore, MemoryStore};
pub use traits::{AuthSignal, CacheStats, LocalStore, QueryCache, RequestOptions, Session, UserApi};
