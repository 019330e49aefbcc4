//! Console logging for the dispatch service.
//!
//! `RUST_LOG` wins when set; otherwise the filter passed by the caller applies.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::error::ServiceError;

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(default_filter: &str) -> Result<(), ServiceError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .map_err(|error| ServiceError::Logging(error.to_string()))
}
