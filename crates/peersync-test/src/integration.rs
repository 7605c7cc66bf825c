//! End-to-end Integration Test Suite
//!
//! Scenarios that drive real agents through the command feed:
//! - Full-mesh convergence after gossip
//! - Endorsement accumulation along independent paths
//! - Partition isolation and recovery
//! - Admission rules
//! - Document identity stability

use std::collections::BTreeSet;

use peersync_core::{AgentId, SyncResult};
use peersync_log::{Delta, DeltaLog};
use peersync_runtime::CommandOutcome;
use peersync_state::Entry;

use crate::simulator::{Simulation, SimulationConfig};
use crate::state_fuzzer::properties;

/// Identity of the `{"say": "hello, world"}` document
pub const HELLO_WORLD_DID: &str = "did:peer:1z6NRwAcQAJP8iFvVT3XqYcp97vtcuChXu9EzbZ9zJcMqdq";

// ============================================================================
// RESULTS
// ============================================================================

/// Outcome of one scenario
#[derive(Debug, Clone, Default)]
pub struct ScenarioResult {
    pub name: &'static str,
    pub converged: bool,
    pub gossip_rounds: usize,
    /// Human-readable descriptions of every failed check
    pub violations: Vec<String>,
}

impl ScenarioResult {
    pub fn new(name: &'static str) -> Self {
        ScenarioResult {
            name,
            ..Default::default()
        }
    }

    pub fn check(&mut self, ok: bool, what: impl Into<String>) {
        if !ok {
            self.violations.push(what.into());
        }
    }

    pub fn passed(&self) -> bool {
        self.converged && self.violations.is_empty()
    }
}

fn check_replicas(sim: &Simulation, result: &mut ScenarioResult) {
    for info in sim.registry().list() {
        let Some(store) = sim.registry().store(info.spec.id) else {
            continue;
        };
        result.check(
            properties::unsorted_parties(&store) == 0,
            format!("{} holds an unsorted party list", info.spec.id),
        );
        result.check(
            properties::duplicate_logical(&store) == 0,
            format!("{} holds a duplicated change", info.spec.id),
        );
    }
}

fn endorsers(entry: &Entry) -> BTreeSet<AgentId> {
    entry
        .as_quorum()
        .map(|q| q.endorsers.clone())
        .unwrap_or_default()
}

// ============================================================================
// SCENARIOS
// ============================================================================

/// Every agent originates a change, then all agents gossip until they agree
pub async fn full_mesh_convergence(config: SimulationConfig) -> SyncResult<ScenarioResult> {
    let agents = ["A.1", "A.2", "B.1", "B.2", "C.1"];
    let sim = Simulation::start(&agents, config)?;
    let mut result = ScenarioResult::new("full_mesh_convergence");

    for agent in agents {
        sim.run(&format!("{agent}: simple")).await?;
    }
    result.gossip_rounds = sim.converge().await?;
    result.converged = sim.converged();

    for agent in agents {
        let line = format!("{agent}: simple");
        let Some(created) = sim.created(&line) else {
            result.check(false, format!("{line} created nothing"));
            continue;
        };
        let party = agent.chars().next().unwrap_or('A');
        for peer in agents {
            result.check(
                sim.entries(peer, party).contains(&created),
                format!("{peer} is missing {created}"),
            );
        }
    }
    check_replicas(&sim, &mut result);
    sim.finish().await;
    Ok(result)
}

/// A 2-of-n change endorsed by two members who each saw it first from the
/// originator ends up with exactly those two endorsers everywhere
pub async fn endorsement_paths(config: SimulationConfig) -> SyncResult<ScenarioResult> {
    let agents = ["A.1", "A.2@a", "A.3@a", "B.1"];
    let sim = Simulation::start(&agents, config)?;
    let mut result = ScenarioResult::new("endorsement_paths");

    sim.run("A.1: simple by 2@a").await?;
    result.gossip_rounds = sim.converge().await?;
    result.converged = sim.converged();

    let expected: BTreeSet<AgentId> = ["A.2", "A.3"].iter().filter_map(|s| s.parse().ok()).collect();
    for agent in ["A.1", "A.2", "A.3", "B.1"] {
        let gated: Vec<Entry> = sim
            .entries(agent, 'A')
            .into_iter()
            .filter(|e| e.as_quorum().is_some())
            .collect();
        result.check(gated.len() == 1, format!("{agent} holds {} gated changes", gated.len()));
        for entry in &gated {
            result.check(
                endorsers(entry) == expected,
                format!("{agent} sees {entry}"),
            );
            result.check(
                entry.as_quorum().map_or(false, |q| q.is_satisfied()),
                format!("{agent} sees {entry} unsatisfied"),
            );
        }
    }
    check_replicas(&sim, &mut result);
    sim.finish().await;
    Ok(result)
}

/// Two components stay apart while excluded, then heal and converge
pub async fn partition_recovery(config: SimulationConfig) -> SyncResult<ScenarioResult> {
    let agents = ["A.1-B.1,B.2", "A.2-B.1,B.2", "B.1", "B.2"];
    let sim = Simulation::start(&agents, config)?;
    let mut result = ScenarioResult::new("partition_recovery");

    result.check(
        sim.registry().components().len() == 2,
        "expected two components",
    );
    sim.run_script(&["A.1: simple", "B.1: simple"]).await?;
    sim.gossip_round().await?;

    let from_a = sim.created("A.1: simple");
    let from_b = sim.created("B.1: simple");
    if let (Some(from_a), Some(from_b)) = (&from_a, &from_b) {
        for agent in ["B.1", "B.2"] {
            result.check(
                !sim.entries(agent, 'A').contains(from_a),
                format!("{agent} saw {from_a} across the partition"),
            );
        }
        for agent in ["A.1", "A.2"] {
            result.check(
                !sim.entries(agent, 'B').contains(from_b),
                format!("{agent} saw {from_b} across the partition"),
            );
        }
        result.check(sim.entries("A.2", 'A').contains(from_a), "A.2 missed A.1's change");
    } else {
        result.check(false, "simple commands created nothing");
    }
    result.check(!sim.converged(), "components agreed while partitioned");

    sim.heal_all();
    result.gossip_rounds = sim.converge().await?;
    result.converged = sim.converged();
    if let Some(from_a) = &from_a {
        result.check(sim.entries("B.2", 'A').contains(from_a), "B.2 missed A.1's change after healing");
    }
    check_replicas(&sim, &mut result);
    sim.finish().await;
    Ok(result)
}

/// `add` rejects foreign parties and existing agents; an admitted agent
/// never endorses its own admission; `rem` is unsupported
pub async fn admission_rules(config: SimulationConfig) -> SyncResult<ScenarioResult> {
    let sim = Simulation::start(&["A.1@a", "A.2@a", "B.1"], config)?;
    let mut result = ScenarioResult::new("admission_rules");

    sim.run_script(&["A.1: add B.5", "A.1: add A.2", "A.1: add A.3@a by 2@a", "A.1: rem A.2"])
        .await?;

    result.check(
        matches!(sim.outcome("A.1: add B.5"), Some(CommandOutcome::Rejected(_))),
        "cross-party add was not rejected",
    );
    result.check(
        sim.lines_for("A.1")
            .contains(&"I'm in A; I can't add a key for B.".to_string()),
        "cross-party add was not reported",
    );
    result.check(
        matches!(sim.outcome("A.1: add A.2"), Some(CommandOutcome::Rejected(_))),
        "duplicate add was not rejected",
    );
    result.check(
        sim.lines_for("A.1").contains(&"Agent A.2 already exists.".to_string()),
        "duplicate add was not reported",
    );
    result.check(
        matches!(sim.outcome("A.1: add A.3@a by 2@a"), Some(CommandOutcome::Admitted { .. })),
        "admission failed",
    );
    result.check(
        sim.outcome("A.1: rem A.2") == Some(CommandOutcome::Unsupported("rem")),
        "rem did something",
    );

    let a3: Option<AgentId> = "A.3".parse().ok();
    result.check(
        a3.map_or(false, |id| sim.registry().contains(id)),
        "A.3 is not running",
    );
    // the new agent takes commands issued after its admission
    sim.run("A.3: state").await?;
    result.check(
        matches!(sim.outcome("A.3: state"), Some(CommandOutcome::Reported(_))),
        "A.3 ignored its command",
    );

    result.gossip_rounds = sim.converge().await?;
    result.converged = sim.converged();

    let expected: BTreeSet<AgentId> = ["A.1", "A.2"].iter().filter_map(|s| s.parse().ok()).collect();
    let admission = sim
        .entries("A.3", 'A')
        .into_iter()
        .find(|e| e.as_quorum().map_or(false, |q| q.base == "#add-A.3"));
    match admission {
        Some(entry) => result.check(endorsers(&entry) == expected, format!("A.3 sees {entry}")),
        None => result.check(false, "A.3 does not know its admission"),
    }
    check_replicas(&sim, &mut result);
    sim.finish().await;
    Ok(result)
}

/// A document's identity is fixed by its genesis, whatever follows
pub fn identity_stability() -> SyncResult<ScenarioResult> {
    let mut result = ScenarioResult::new("identity_stability");
    let mut log = DeltaLog::new();
    result.check(log.identity().is_none(), "empty log has an identity");

    log.append(Delta::new(br#"{"say": "hello, world"}"#, vec![])?)?;
    let genesis = log.identity().map(str::to_string);
    result.check(
        genesis.as_deref() == Some(HELLO_WORLD_DID),
        format!("genesis identity is {genesis:?}"),
    );

    log.append(Delta::new(br#"{"say": "hello, yourself!"}"#, vec![])?)?;
    result.check(log.identity().map(str::to_string) == genesis, "identity moved");
    result.check(log.current_version() == 2, "log lost a delta");
    result.converged = true;
    Ok(result)
}
