//! peersync Core - Fundamental types and primitives
//!
//! This crate defines the core types used throughout peersync:
//! - Identifiers (PartyId, AgentId, GroupTag, AgentSpec)
//! - Time primitives (Timestamp)
//! - The DID collaborator contract
//! - Error kinds shared by every other crate

pub mod did;
pub mod error;
pub mod id;
pub mod time;

pub use did::*;
pub use error::*;
pub use id::*;
pub use time::*;
