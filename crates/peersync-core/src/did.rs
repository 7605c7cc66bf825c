//! DID collaborator contract
//!
//! Syntax validation and ordering of DID strings are provided by the host;
//! peersync only calls into them.

use std::cmp::Ordering;

/// Method prefix shared by every peer DID
pub const PEER_DID_PREFIX: &str = "did:peer:";

/// DID string rules supplied by the embedding application
pub trait DidRules: Send + Sync {
    /// Whether `did` is syntactically a peer DID
    fn is_valid(&self, did: &str) -> bool;

    /// Whether `did` is a reserved test sentinel (numeric suffix made of one
    /// repeated character)
    fn is_reserved(&self, did: &str) -> bool;

    /// Canonical order: case-sensitive prefix, then case-insensitive suffix
    fn compare(&self, a: &str, b: &str) -> Ordering;
}
