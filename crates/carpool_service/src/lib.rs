//! Async runtime around the synchronous dispatch engines.
//!
//! This crate owns the process-level concerns: logging setup, the fixed-rate
//! schedulers for route ticks and waiting-queue retries, bus consumers, and
//! wiring engines to topics. All dispatch semantics live in `carpool_core`.

pub mod consumer;
pub mod error;
pub mod logging;
pub mod scheduler;
pub mod service;
