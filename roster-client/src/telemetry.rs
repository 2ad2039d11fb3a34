//! Tracing initialization for the `roster` binary.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ClientError, ClientResult};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "roster=debug,info";

/// Install a JSON fmt subscriber on stderr, filtered by `RUST_LOG`.
///
/// Stdout is left for the command's own output.
pub fn init_tracing() -> ClientResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| ClientError::Telemetry(e.to_string()))?;

    tracing::debug!(filter = DEFAULT_FILTER, "Tracing initialized");
    Ok(())
}
