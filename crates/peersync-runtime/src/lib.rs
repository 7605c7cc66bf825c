//! peersync runtime - agents, command feed and registry
//!
//! Each agent is a tokio task that:
//! 1. Walks the shared command feed and executes commands addressed to it
//! 2. Merges deliveries from its bounded mailbox
//! 3. Optionally autogossips on a fixed tick
//!
//! The [`AgentRegistry`] ties agents together and doubles as the gossip
//! layer's peer directory. [`AgentRegistry::settled`] awaits quiescence so
//! tests never sleep.

pub mod agent;
pub mod command;
pub mod config;
pub mod output;
pub mod registry;
pub mod telemetry;

pub use agent::*;
pub use command::*;
pub use config::*;
pub use output::*;
pub use registry::*;
pub use telemetry::*;
