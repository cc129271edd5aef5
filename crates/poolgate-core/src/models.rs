//! Domain models for poolgate.
//!
//! These are the core types shared across all crates.

pub mod audit;
pub mod grant;
pub mod lease;
pub mod resource;
pub mod stats;
