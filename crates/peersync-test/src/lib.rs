//! peersync Test Harness - Simulation, chaos delivery and merge validation
//!
//! This crate provides:
//! - Chaos delivery (loss, reordering, duplication)
//! - Scenario simulation over live agents
//! - Replica state fuzzing
//! - End-to-end integration scenarios

pub mod chaos;
pub mod integration;
pub mod simulator;
pub mod state_fuzzer;

pub use chaos::*;
pub use integration::*;
pub use simulator::*;
pub use state_fuzzer::*;
