//! ROSTER Client - HTTP Collaborator and CLI Support
//!
//! Binds the cache core to the outside world: a reqwest [`HttpUserApi`],
//! TOML configuration and tracing setup for the `roster` binary.

pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod telemetry;

pub use cli::Command;
pub use config::{ClientConfig, ClientConfigError};
pub use error::{ClientError, ClientResult};
pub use http::HttpUserApi;
pub use telemetry::init_tracing;
