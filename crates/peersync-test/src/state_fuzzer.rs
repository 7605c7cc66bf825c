//! State Fuzzer - Randomised replica traffic for merge validation
//!
//! Tests:
//! - Convergence after lossy, reordered, duplicated delivery plus anti-entropy
//! - Canonical ordering of every party list
//! - One entry per logical change
//! - Endorsements only from members of the owning party and group
//! - No agent endorsing its own admission

use std::collections::BTreeMap;

use peersync_core::{AgentId, AgentSpec, GroupTag, PartyId};
use peersync_gossip::missing_entries;
use peersync_state::{
    admission_base, Entry, LocalAgent, MergeOutcome, PeerStore, QuorumChange, QuorumMerge,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{ChaosConfig, ChaosNetwork};

/// Fuzzer configuration
#[derive(Clone, Debug)]
pub struct FuzzerConfig {
    /// Number of parties (at most 26)
    pub party_count: usize,
    /// Agents per party (at most 9)
    pub agents_per_party: usize,
    /// Number of changes to originate
    pub event_count: usize,
    /// Probability that a change is quorum gated
    pub quorum_prob: f64,
    /// Probability that a gated change is an admission
    pub admission_prob: f64,
    /// Delivery chaos
    pub chaos: ChaosConfig,
    /// Random seed
    pub seed: u64,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        FuzzerConfig {
            party_count: 3,
            agents_per_party: 3,
            event_count: 200,
            quorum_prob: 0.5,
            admission_prob: 0.2,
            chaos: ChaosConfig::poor(),
            seed: 42,
        }
    }
}

impl FuzzerConfig {
    /// Light fuzzing for quick tests
    pub fn light() -> Self {
        FuzzerConfig {
            party_count: 2,
            agents_per_party: 2,
            event_count: 40,
            quorum_prob: 0.5,
            admission_prob: 0.2,
            chaos: ChaosConfig::default(),
            seed: 42,
        }
    }

    /// Heavy fuzzing for thorough testing
    pub fn heavy() -> Self {
        FuzzerConfig {
            party_count: 4,
            agents_per_party: 5,
            event_count: 1000,
            quorum_prob: 0.7,
            admission_prob: 0.3,
            chaos: ChaosConfig::hostile(),
            seed: 42,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// One replica under test
pub struct FuzzNode {
    pub spec: AgentSpec,
    pub merge: QuorumMerge,
    pub store: PeerStore,
    pub merges: u64,
}

impl FuzzNode {
    pub fn new(spec: AgentSpec, parties: &[PartyId]) -> Self {
        let mut store = PeerStore::new();
        store.init_parties(parties.iter().copied());
        let merge = QuorumMerge::for_agent(LocalAgent::new(spec.id, spec.groups.iter().copied()));
        FuzzNode {
            spec,
            merge,
            store,
            merges: 0,
        }
    }

    pub fn id(&self) -> AgentId {
        self.spec.id
    }

    pub fn apply(&mut self, party: PartyId, entry: Entry) -> MergeOutcome {
        self.merges += 1;
        self.merge.merge(&mut self.store, party, entry)
    }
}

type Delivery = (AgentId, PartyId, Entry);

/// State fuzzer
pub struct StateFuzzer {
    config: FuzzerConfig,
    nodes: BTreeMap<AgentId, FuzzNode>,
    network: ChaosNetwork<Delivery>,
    rng: StdRng,
    event_seq: u64,
}

impl StateFuzzer {
    pub fn new(config: FuzzerConfig) -> Self {
        let parties: Vec<PartyId> = (b'A'..=b'Z')
            .take(config.party_count.clamp(1, 26))
            .filter_map(|c| PartyId::new(c as char).ok())
            .collect();
        let group_a = GroupTag::new('a').ok();
        let group_b = GroupTag::new('b').ok();

        let mut nodes = BTreeMap::new();
        for party in &parties {
            for number in 1..=config.agents_per_party.clamp(1, 9) as u8 {
                let Ok(id) = AgentId::new(*party, number) else {
                    continue;
                };
                // odd numbers belong to both groups, even numbers only to b
                let groups = if number % 2 == 1 {
                    [group_a, group_b].into_iter().flatten().collect::<Vec<_>>()
                } else {
                    group_b.into_iter().collect()
                };
                let spec = AgentSpec::new(id).with_groups(groups);
                nodes.insert(id, FuzzNode::new(spec, &parties));
            }
        }

        StateFuzzer {
            network: ChaosNetwork::new(config.chaos.clone(), config.seed ^ 0x5eed),
            rng: StdRng::seed_from_u64(config.seed),
            config,
            nodes,
            event_seq: 0,
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &FuzzNode> {
        self.nodes.values()
    }

    /// Originate one change at a random agent and send it to every other
    fn originate(&mut self) {
        let ids: Vec<AgentId> = self.nodes.keys().copied().collect();
        let source = ids[self.rng.gen_range(0..ids.len())];
        self.event_seq += 1;
        let token = format!("#{:x}", 0x1000 + self.event_seq);

        let entry = if self.rng.gen::<f64>() < self.config.quorum_prob {
            let threshold = self.rng.gen_range(1..=3u8);
            let tag = if self.rng.gen_bool(0.5) { 'a' } else { 'b' };
            let Ok(group) = GroupTag::new(tag) else {
                return;
            };
            let base = if self.rng.gen::<f64>() < self.config.admission_prob {
                let number = self.rng.gen_range(1..=9u8);
                match AgentId::new(source.party, number) {
                    Ok(admitted) if admitted != source => admission_base(admitted),
                    _ => token,
                }
            } else {
                token
            };
            Entry::Quorum(QuorumChange::new(base, threshold, group))
        } else {
            Entry::Opaque(token)
        };

        let party = source.party;
        let Some(node) = self.nodes.get_mut(&source) else {
            return;
        };
        let stored = node.apply(party, entry).entry().clone();
        for to in ids.into_iter().filter(|id| *id != source) {
            self.network.send((to, party, stored.clone()));
        }
    }

    fn deliver(&mut self, (to, party, entry): Delivery) {
        if let Some(node) = self.nodes.get_mut(&to) {
            node.apply(party, entry);
        }
    }

    /// Full-mesh anti-entropy until a pass changes nothing. Returns the
    /// number of passes.
    pub fn anti_entropy(&mut self, max_passes: usize) -> usize {
        let ids: Vec<AgentId> = self.nodes.keys().copied().collect();
        for pass in 1..=max_passes {
            let mut changed = false;
            for a in &ids {
                for b in &ids {
                    if a == b {
                        continue;
                    }
                    let missing = missing_entries(&self.nodes[a].store, &self.nodes[b].store);
                    if let Some(node) = self.nodes.get_mut(b) {
                        for (party, entry) in missing {
                            changed |= node.apply(party, entry).changed();
                        }
                    }
                }
            }
            if !changed {
                return pass;
            }
        }
        max_passes
    }

    /// Run the fuzzer
    pub fn run(&mut self) -> FuzzResult {
        for _ in 0..self.config.event_count {
            self.originate();
            let burst = self.rng.gen_range(0..=self.nodes.len());
            for _ in 0..burst {
                match self.network.recv() {
                    Some(delivery) => self.deliver(delivery),
                    None => break,
                }
            }
        }
        for delivery in self.network.drain() {
            self.deliver(delivery);
        }
        let passes = self.anti_entropy(2 * self.nodes.len() + 2);

        let mut result = self.check_invariants();
        result.anti_entropy_passes = passes;
        result.merges = self.nodes.values().map(|n| n.merges).sum();
        result.lost = self.network.stats().lost;
        result
    }

    /// Check all invariants
    pub fn check_invariants(&self) -> FuzzResult {
        let mut result = FuzzResult::new();
        result.convergence = self.check_convergence();
        for node in self.nodes.values() {
            result.order_violations += properties::unsorted_parties(&node.store);
            result.duplicate_violations += properties::duplicate_logical(&node.store);
            result.endorsement_violations += self.foreign_endorsements(&node.store);
        }
        result
    }

    fn check_convergence(&self) -> ConvergenceResult {
        let mut fingerprints = self.nodes.values().map(|n| (n.id(), n.store.fingerprint()));
        let Some((_, reference)) = fingerprints.next() else {
            return ConvergenceResult::Converged;
        };
        let divergent: Vec<AgentId> = fingerprints
            .filter(|(_, fp)| *fp != reference)
            .map(|(id, _)| id)
            .collect();
        if divergent.is_empty() {
            ConvergenceResult::Converged
        } else {
            ConvergenceResult::Diverged(divergent)
        }
    }

    /// Endorsers outside the owning party or group, or admitted agents
    /// endorsing themselves
    fn foreign_endorsements(&self, store: &PeerStore) -> u32 {
        let mut violations = 0;
        for (party, entry) in store.iter() {
            let Some(change) = entry.as_quorum() else {
                continue;
            };
            for endorser in &change.endorsers {
                let member = self
                    .nodes
                    .get(endorser)
                    .map_or(false, |n| n.spec.in_group(change.group));
                if endorser.party != party || !member || change.base == admission_base(*endorser) {
                    violations += 1;
                }
            }
        }
        violations
    }
}

/// Convergence check result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    Converged,
    Diverged(Vec<AgentId>),
}

impl ConvergenceResult {
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }
}

/// Fuzzing result
#[derive(Debug, Clone)]
pub struct FuzzResult {
    pub convergence: ConvergenceResult,
    pub order_violations: u32,
    pub duplicate_violations: u32,
    pub endorsement_violations: u32,
    pub anti_entropy_passes: usize,
    pub merges: u64,
    pub lost: u64,
}

impl FuzzResult {
    pub fn new() -> Self {
        FuzzResult {
            convergence: ConvergenceResult::Converged,
            order_violations: 0,
            duplicate_violations: 0,
            endorsement_violations: 0,
            anti_entropy_passes: 0,
            merges: 0,
            lost: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.convergence.is_converged()
            && self.order_violations == 0
            && self.duplicate_violations == 0
            && self.endorsement_violations == 0
    }
}

impl Default for FuzzResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Replica invariants shared with the integration scenarios
pub mod properties {
    use super::*;

    /// Parties whose list is not in canonical order
    pub fn unsorted_parties(store: &PeerStore) -> u32 {
        store
            .parties()
            .filter(|p| store.entries(*p).windows(2).any(|w| w[0] > w[1]))
            .count() as u32
    }

    /// Entries sharing a logical change with an earlier entry of the same party
    pub fn duplicate_logical(store: &PeerStore) -> u32 {
        let mut count = 0;
        for party in store.parties() {
            let entries = store.entries(party);
            for (i, entry) in entries.iter().enumerate() {
                if entries[..i].iter().any(|e| e.same_logical(entry)) {
                    count += 1;
                }
            }
        }
        count
    }
}
