//! Shared carpool dispatch contracts.
//!
//! This crate owns the wire-level event shapes exchanged over the message bus,
//! registration validation, and the persisted key layout of the shared store.
//! It intentionally excludes store, bus, and runtime concerns.

pub mod contract;
pub mod storage_keys;
