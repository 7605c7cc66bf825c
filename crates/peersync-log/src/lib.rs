//! peersync Log - Authoritative delta history for a single document
//!
//! - Content-addressed deltas (SHA-256 over the decoded change)
//! - Append-only logs whose identity is fixed by the genesis delta
//! - Deterministic replay into a materialized document
//! - Document validation, persistence sink contract, and a small repository

pub mod delta;
pub mod log;
pub mod repo;
pub mod resolve;
pub mod sink;
pub mod validate;

pub use delta::*;
pub use log::*;
pub use repo::*;
pub use resolve::*;
pub use sink::*;
pub use validate::*;
