//! Error types for ROSTER operations

use thiserror::Error;

/// Failures of the shared network fetch.
///
/// Every caller joined on the same in-flight request receives a clone of
/// the same value, hence `Clone`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request to {path} timed out after {timeout_ms}ms")]
    Timeout { path: String, timeout_ms: u64 },

    #[error("Transport error for {path}: {reason}")]
    Transport { path: String, reason: String },

    #[error("Request to {path} failed with status {status}: {message}")]
    Status {
        path: String,
        status: u16,
        message: String,
    },

    #[error("Invalid response from {path}: {reason}")]
    InvalidResponse { path: String, reason: String },

    #[error("Fetch task for {key} aborted: {reason}")]
    Aborted { key: String, reason: String },
}

impl FetchError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Transport { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::InvalidResponse { .. } | Self::Aborted { .. } => false,
        }
    }
}

/// Persisted local store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store I/O failed for {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to serialize value for {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all ROSTER errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RosterError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// A persisted entry failed to parse. Reads treat this as a miss.
    #[error("Malformed cache entry {key}: {reason}")]
    MalformedCache { key: String, reason: String },

    /// The session ended; every cache tier has been cleared.
    #[error("Session lost, user data cleared")]
    AuthLoss,
}

impl RosterError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Fetch(err) if err.is_retryable())
    }
}

/// Result type alias for ROSTER operations.
pub type RosterResult<T> = Result<T, RosterError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_display_timeout() {
        let err = FetchError::Timeout {
            path: "/api/me".to_string(),
            timeout_ms: 12_000,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("/api/me"));
        assert!(msg.contains("12000"));
    }

    #[test]
    fn test_fetch_error_retryable() {
        let server = FetchError::Status {
            path: "/api/me".to_string(),
            status: 503,
            message: "unavailable".to_string(),
        };
        let client = FetchError::Status {
            path: "/api/me".to_string(),
            status: 404,
            message: "missing".to_string(),
        };
        let body = FetchError::InvalidResponse {
            path: "/api/me".to_string(),
            reason: "not json".to_string(),
        };
        assert!(server.is_retryable());
        assert!(!client.is_retryable());
        assert!(!body.is_retryable());
        assert!(RosterError::from(server).is_retryable());
        assert!(!RosterError::AuthLoss.is_retryable());
    }

    #[test]
    fn test_store_error_display_io() {
        let err = StoreError::Io {
            path: "/tmp/user.json".to_string(),
            reason: "denied".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("/tmp/user.json"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "throttle_window".to_string(),
            value: "0ms".to_string(),
            reason: "must be > 0".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("throttle_window"));
        assert!(msg.contains("0ms"));
        assert!(msg.contains("must be > 0"));
    }

    #[test]
    fn test_roster_error_from_variants() {
        let fetch = RosterError::from(FetchError::Transport {
            path: "/api/me".to_string(),
            reason: "reset".to_string(),
        });
        assert!(matches!(fetch, RosterError::Fetch(_)));

        let store = RosterError::from(StoreError::LockPoisoned);
        assert!(matches!(store, RosterError::Store(_)));

        let config = RosterError::from(ConfigError::MissingRequired {
            field: "route_key".to_string(),
        });
        assert!(matches!(config, RosterError::Config(_)));
    }

    #[test]
    fn test_errors_clone_equal() {
        let err = RosterError::MalformedCache {
            key: "user".to_string(),
            reason: "EOF".to_string(),
        };
        assert_eq!(err.clone(), err);
    }
}
