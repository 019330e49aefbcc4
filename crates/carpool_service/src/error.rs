use carpool_core::config::ConfigError;
use carpool_core::reference::ReferenceDataError;
use carpool_core::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("reference data: {0}")]
    ReferenceData(#[from] ReferenceDataError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to read driver registrations {path}: {message}")]
    Registrations { path: String, message: String },
    #[error("logging already initialised: {0}")]
    Logging(String),
    #[error("failed to wait for shutdown signal: {0}")]
    Signal(#[source] std::io::Error),
}
