//! peersync gossip
//!
//! How replica entries move between agents.
//!
//! Two mechanisms, both safe only because merge is idempotent:
//! - Broadcast: one-way, fire-and-forget push of a fresh entry to every
//!   reachable peer
//! - Gossip: pairwise, bidirectional anti-entropy; each side receives every
//!   entry it does not hold by canonical value
//!
//! Reachability is modelled by a [`PartitionMap`]: an undirected graph over
//! agents where an exclusion on either side removes the edge. Entries travel
//! as [`Envelope`]s through bounded per-agent mailboxes; a shared
//! [`InFlight`] counter lets callers await quiescence.

pub mod engine;
pub mod propagation;
pub mod topology;

pub use engine::*;
pub use propagation::*;
pub use topology::*;
