//! peersync State Engine - Peer replicas and quorum merge
//!
//! This crate implements the replica side of synchronization:
//! - Entry parsing (opaque tokens vs. m-of-n quorum changes)
//! - Per-party, canonically sorted replica store
//! - Join semantics that union endorsements (idempotent, commutative,
//!   associative)
//! - Local endorsement of changes gated on the agent's own groups

pub mod entry;
pub mod merge;
pub mod store;

pub use entry::*;
pub use merge::*;
pub use store::*;
