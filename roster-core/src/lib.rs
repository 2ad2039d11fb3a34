//! ROSTER Core - User Record Types
//!
//! Pure data structures shared by every ROSTER crate: identifiers, the
//! canonical [`UserRecord`], the upstream payload normalizer, the cache
//! policy and the error taxonomy. No IO happens in this crate.

pub mod config;
pub mod error;
pub mod identity;
pub mod normalize;
pub mod record;

pub use config::{
    CachePolicy, DEFAULT_REQUEST_TIMEOUT, DEFAULT_RETRIES, DEFAULT_RETRY_BACKOFF,
    DEFAULT_ROUTE_KEY, DEFAULT_THROTTLE_WINDOW, PERSISTED_USER_KEY,
};
pub use error::{ConfigError, FetchError, RosterError, RosterResult, StoreError};
pub use identity::{CacheKey, ConsumerId, QueryKey, SessionId, Timestamp};
pub use normalize::{normalize, ParsedShape};
pub use record::{CacheEntry, StudentProfile, UserId, UserRecord};
