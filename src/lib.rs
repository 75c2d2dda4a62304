//! FLIPFLEET: rate-limit aware flipping agents.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry points.

pub mod catalog;
pub mod clock;
pub mod config;
pub mod coord;
pub mod engine;
pub mod error;
pub mod limits;
pub mod notify;
pub mod storage;
pub mod strategy;
pub mod types;
pub mod venue;
