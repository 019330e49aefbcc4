pub mod availability;
pub mod bus;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod idempotency;
pub mod lock;
pub mod matching;
pub mod reference;
pub mod route;
pub mod store;

#[cfg(feature = "test-helpers")]
pub mod test_helpers;

mod handler;
