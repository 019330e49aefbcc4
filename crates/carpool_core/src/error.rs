use carpool_contracts::contract::{CodecError, DriverId, ValidationError};

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid driver registration: {0}")]
    Validation(#[from] ValidationError),
    #[error("lock `{key}` not acquired after {attempts} attempts")]
    LockUnavailable { key: &'static str, attempts: u32 },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("malformed payload: {0}")]
    Codec(#[from] CodecError),
    #[error("reference data `{0}` is missing")]
    MissingReferenceData(&'static str),
    #[error("route state of driver {driver_id} is inconsistent: {message}")]
    CorruptRouteState { driver_id: DriverId, message: String },
}

impl EngineError {
    /// Transient failures leave state untouched and should be retried
    /// (message paths leave the message unacknowledged).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::LockUnavailable { .. } | Self::Store(_))
    }
}
