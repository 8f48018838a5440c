//! Trendline — library crate for integration testing.
//!
//! Re-exports modules needed by integration tests in `tests/`.

pub mod access;
pub mod aggregate;
pub mod cache;
pub mod config;
pub mod errors;
pub mod models;
pub mod refresh;
pub mod store;
