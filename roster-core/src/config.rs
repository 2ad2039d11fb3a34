//! Cache and request policy

use crate::error::ConfigError;
use crate::identity::CacheKey;
use std::time::Duration;

/// Minimum time between two forced refreshes of the same key.
pub const DEFAULT_THROTTLE_WINDOW: Duration = Duration::from_secs(10);

/// Per-request timeout handed to the HTTP collaborator.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(12_000);

/// Retries on top of the first attempt.
pub const DEFAULT_RETRIES: u32 = 2;

/// Base delay between retries, multiplied by the attempt number.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Route that populates the authenticated user's profile.
pub const DEFAULT_ROUTE_KEY: &str = "/api/me";

/// Key of the serialized record in the persisted local store.
pub const PERSISTED_USER_KEY: &str = "user";

/// Policy shared by the coordinator, the layered cache and the HTTP client.
#[derive(Debug, Clone, PartialEq)]
pub struct CachePolicy {
    /// Cooldown after a successful fetch during which forced refreshes of
    /// the same key are skipped.
    pub throttle_window: Duration,
    pub request_timeout: Duration,
    pub retries: u32,
    pub retry_backoff: Duration,
    /// Route used when a read does not name one.
    pub default_route: CacheKey,
    pub persisted_key: String,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            throttle_window: DEFAULT_THROTTLE_WINDOW,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retries: DEFAULT_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            default_route: CacheKey::from(DEFAULT_ROUTE_KEY),
            persisted_key: PERSISTED_USER_KEY.to_string(),
        }
    }
}

impl CachePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_throttle_window(mut self, window: Duration) -> Self {
        self.throttle_window = window;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_default_route(mut self, route: impl Into<CacheKey>) -> Self {
        self.default_route = route.into();
        self
    }

    pub fn with_persisted_key(mut self, key: impl Into<String>) -> Self {
        self.persisted_key = key.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout".to_string(),
                value: format!("{:?}", self.request_timeout),
                reason: "must be > 0".to_string(),
            });
        }
        if self.default_route.as_str().trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "default_route".to_string(),
            });
        }
        if !self.default_route.as_str().starts_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "default_route".to_string(),
                value: self.default_route.to_string(),
                reason: "must start with '/'".to_string(),
            });
        }
        if self.persisted_key.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "persisted_key".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_matches_constants() {
        let policy = CachePolicy::default();
        assert_eq!(policy.throttle_window, Duration::from_secs(10));
        assert_eq!(policy.request_timeout, Duration::from_millis(12_000));
        assert_eq!(policy.retries, 2);
        assert_eq!(policy.default_route.as_str(), "/api/me");
        assert_eq!(policy.persisted_key, "user");
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_policy_builder() {
        let policy = CachePolicy::new()
            .with_throttle_window(Duration::from_secs(30))
            .with_request_timeout(Duration::from_secs(5))
            .with_retries(0)
            .with_retry_backoff(Duration::from_millis(10))
            .with_default_route("/profile/consolidated")
            .with_persisted_key("profile");

        assert_eq!(policy.throttle_window, Duration::from_secs(30));
        assert_eq!(policy.request_timeout, Duration::from_secs(5));
        assert_eq!(policy.retries, 0);
        assert_eq!(policy.retry_backoff, Duration::from_millis(10));
        assert_eq!(policy.default_route.as_str(), "/profile/consolidated");
        assert_eq!(policy.persisted_key, "profile");
    }

    #[test]
    fn test_policy_rejects_zero_timeout() {
        let policy = CachePolicy::new().with_request_timeout(Duration::ZERO);
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_policy_rejects_relative_route() {
        let policy = CachePolicy::new().with_default_route("api/me");
        assert!(matches!(
            policy.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
        let policy = CachePolicy::new().with_default_route(" ");
        assert!(matches!(
            policy.validate(),
            Err(ConfigError::MissingRequired { .. })
        ));
    }
}
