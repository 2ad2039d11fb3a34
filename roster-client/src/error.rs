//! Error types for the client.

use crate::config::ClientConfigError;
use roster_core::RosterError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ClientConfigError),
    #[error(transparent)]
    Roster(#[from] RosterError),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid header {name}: {reason}")]
    InvalidHeader { name: &'static str, reason: String },
    #[error("Failed to render output: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Failed to initialize tracing: {0}")]
    Telemetry(String),
}

pub type ClientResult<T> = Result<T, ClientError>;
