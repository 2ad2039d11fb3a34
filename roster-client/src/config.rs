//! Configuration loading for the ROSTER client.
//!
//! All fields are required. No defaults.

use roster_core::CachePolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub auth_token: String,
    pub session_id: String,
    pub store_path: PathBuf,
    pub request_timeout_ms: u64,
    pub retries: u32,
    pub retry_backoff_ms: u64,
    pub throttle_window_ms: u64,
    pub route_key: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientConfigError {
    #[error("Missing configuration file path (use --config or ROSTER_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ClientConfig {
    /// Load from the path given by `--config` or `ROSTER_CONFIG`.
    pub fn load() -> Result<Self, ClientConfigError> {
        let path = config_path_from_args(std::env::args().skip(1)).or_else(config_path_from_env);
        let path = path.ok_or(ClientConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ClientConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ClientConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(ClientConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://") {
            return Err(ClientConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must start with http:// or https://".to_string(),
            });
        }
        if self.auth_token.trim().is_empty() {
            return Err(ClientConfigError::InvalidValue {
                field: "auth_token",
                reason: "must not be empty".to_string(),
            });
        }
        if self.session_id.trim().is_empty() {
            return Err(ClientConfigError::InvalidValue {
                field: "session_id",
                reason: "must not be empty".to_string(),
            });
        }
        if self.store_path.as_os_str().is_empty() {
            return Err(ClientConfigError::InvalidValue {
                field: "store_path",
                reason: "must not be empty".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ClientConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if !self.route_key.starts_with('/') {
            return Err(ClientConfigError::InvalidValue {
                field: "route_key",
                reason: "must start with '/'".to_string(),
            });
        }
        Ok(())
    }

    /// Cache policy built from the timing fields.
    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy::new()
            .with_request_timeout(Duration::from_millis(self.request_timeout_ms))
            .with_retries(self.retries)
            .with_retry_backoff(Duration::from_millis(self.retry_backoff_ms))
            .with_throttle_window(Duration::from_millis(self.throttle_window_ms))
            .with_default_route(self.route_key.as_str())
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("ROSTER_CONFIG").ok().map(PathBuf::from)
}

pub(crate) fn config_path_from_args(args: impl IntoIterator<Item = String>) -> Option<PathBuf> {
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
