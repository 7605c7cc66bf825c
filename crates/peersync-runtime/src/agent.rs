//! Agent - one simulated participant
//!
//! Each agent runs as its own task:
//! 1. Walk any new commands in the feed and execute those addressed to it
//! 2. Merge deliveries arriving in its mailbox
//! 3. On every tick, maybe autogossip
//!
//! Its replica is only ever mutated by this task. Peers reach it through
//! its mailbox.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use peersync_core::{AgentId, AgentSpec, PartyId, SyncError};
use peersync_gossip::{Envelope, GossipEngine, Inbox};
use peersync_state::{
    admission_base, snapshot, Entry, LocalAgent, PeerStore, QuorumChange, QuorumMerge, SharedPeerStore,
};

use crate::{AgentRegistry, Command, CommandOutcome, Invocation, Requirement};

/// `A.1@a-B.1 => A=#; B=#`
pub fn describe(spec: &AgentSpec, store: &PeerStore) -> String {
    format!("{spec} => {}", store.fingerprint())
}

/// A running agent
pub struct Agent {
    spec: AgentSpec,
    store: SharedPeerStore,
    merge: QuorumMerge,
    gossip: GossipEngine,
    cursor: Arc<AtomicUsize>,
    registry: AgentRegistry,
    rng: StdRng,
}

impl Agent {
    pub(crate) fn new(
        spec: AgentSpec,
        store: SharedPeerStore,
        cursor: Arc<AtomicUsize>,
        registry: AgentRegistry,
    ) -> Self {
        let config = registry.config();
        let rng = match config.rng_seed {
            Some(seed) => {
                let salt = ((spec.id.party.letter() as u64) << 8) | u64::from(spec.id.number);
                StdRng::seed_from_u64(seed.wrapping_mul(31).wrapping_add(salt))
            }
            None => StdRng::from_entropy(),
        };
        let gossip = GossipEngine::new(
            spec.id,
            Arc::new(registry.clone()),
            config.max_delivery_delay,
            config.rng_seed,
        );
        let merge = QuorumMerge::for_agent(LocalAgent::new(spec.id, spec.groups.iter().copied()));
        Agent {
            spec,
            store,
            merge,
            gossip,
            cursor,
            registry,
            rng,
        }
    }

    pub fn id(&self) -> AgentId {
        self.spec.id
    }

    pub fn party(&self) -> PartyId {
        self.spec.id.party
    }

    pub fn spec(&self) -> &AgentSpec {
        &self.spec
    }

    pub fn description(&self) -> String {
        describe(&self.spec, &snapshot(&self.store))
    }

    fn fingerprint(&self) -> String {
        self.store.lock().fingerprint()
    }

    fn say(&self, message: &str) {
        self.registry.sink().say(self.id(), message);
    }

    /// Merge into the local replica; returns the stored entry and the new
    /// fingerprint
    fn merge_local(&self, party: PartyId, entry: Entry) -> (Entry, String) {
        let mut store = self.store.lock();
        let outcome = self.merge.merge(&mut store, party, entry);
        (outcome.entry().clone(), store.fingerprint())
    }

    pub(crate) async fn run(mut self, mut inbox: Inbox, mut shutdown: watch::Receiver<bool>) {
        let registry = self.registry.clone();
        let mut ticker = tokio::time::interval(registry.config().tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(agent = %self.id(), "agent started");
        self.say(&format!("Started. I see {}.", self.fingerprint()));

        loop {
            if *shutdown.borrow() {
                break;
            }
            let appended = registry.feed().appended().notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            self.drain_commands();

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(envelope) = inbox.recv() => self.receive(envelope),
                _ = appended => {}
                _ = ticker.tick() => self.on_tick(),
            }
        }

        tracing::debug!(agent = %self.id(), "agent stopped");
    }

    /// Advance the cursor over every command appended so far
    fn drain_commands(&mut self) {
        let registry = self.registry.clone();
        loop {
            let index = self.cursor.load(Ordering::SeqCst);
            let Some(command) = registry.feed().get(index) else {
                break;
            };
            if command.target == self.id() {
                let outcome = self.execute(index, &command);
                registry.sink().outcome(self.id(), &command, &outcome);
            }
            self.cursor.store(index + 1, Ordering::SeqCst);
            registry.in_flight().poke();
        }
    }

    fn execute(&mut self, index: usize, command: &Command) -> CommandOutcome {
        tracing::debug!(agent = %self.id(), %command, "executing");
        let invocation = match self.registry.verbs().resolve(command) {
            Ok(invocation) => invocation,
            Err(e) => {
                self.say(&format!("Huh? {e}."));
                return CommandOutcome::Unrecognized(e.to_string());
            }
        };
        match invocation {
            Invocation::Simple { requirement } => self.simple(requirement),
            Invocation::Add { spec, requirement } => self.add(spec, requirement, index),
            Invocation::Rem { spec, .. } => self.rem(&spec),
            Invocation::State => self.state(),
            Invocation::Gossip => self.gossip_round(),
        }
    }

    /// Originate a change for our own party and broadcast it
    fn simple(&mut self, requirement: Option<Requirement>) -> CommandOutcome {
        let token = format!("#{:x}", self.rng.gen_range(0x1000..=0x10000u32));
        let entry = gated(token, requirement);
        let party = self.party();

        let (stored, fingerprint) = self.merge_local(party, entry);
        self.say(&format!("Created delta {stored}. I now see {fingerprint}."));
        self.broadcast(party, &stored);
        CommandOutcome::Created { party, entry: stored }
    }

    /// Admit a new agent of our own party
    fn add(&mut self, spec: AgentSpec, requirement: Option<Requirement>, index: usize) -> CommandOutcome {
        if spec.id.party != self.party() {
            self.say(&format!(
                "I'm in {}; I can't add a key for {}.",
                self.party(),
                spec.id.party
            ));
            return CommandOutcome::Rejected(
                SyncError::CrossPartyAdmission {
                    caller: self.id(),
                    party: spec.id.party,
                }
                .to_string(),
            );
        }
        if self.registry.contains(spec.id) {
            self.say(&format!("Agent {} already exists.", spec.id));
            return CommandOutcome::Rejected(SyncError::DuplicateAgent(spec.id).to_string());
        }

        let party = self.party();
        let agent = spec.id;
        let (stored, fingerprint) = self.merge_local(party, gated(admission_base(agent), requirement));
        self.say(&format!("Created delta {stored}. I now see {fingerprint}."));

        let seed = snapshot(&self.store);
        if let Err(e) = self.registry.admit(spec, seed, index + 1) {
            tracing::warn!(agent = %self.id(), new_agent = %agent, "admission failed: {}", e);
            self.say(&format!("Could not start {agent}: {e}."));
            return CommandOutcome::Rejected(e.to_string());
        }

        self.broadcast(party, &stored);
        CommandOutcome::Admitted { agent, entry: stored }
    }

    fn rem(&self, spec: &AgentSpec) -> CommandOutcome {
        tracing::info!(agent = %self.id(), target = %spec.id, "rem is not supported");
        self.say(&format!("Removing {} is not supported.", spec.id));
        CommandOutcome::Unsupported("rem")
    }

    fn state(&self) -> CommandOutcome {
        let fingerprint = self.fingerprint();
        self.say(&format!("OK; I see {fingerprint}"));
        CommandOutcome::Reported(fingerprint)
    }

    fn gossip_round(&self) -> CommandOutcome {
        self.say("Gossiping.");
        match self.gossip.gossip(&self.store, None) {
            Ok(report) => {
                if !report.peers.is_empty() {
                    let peers: Vec<String> = report.peers.iter().map(|p| p.to_string()).collect();
                    self.say(&format!(
                        "Synced with {}: sent {}, asked for {}.",
                        peers.join(", "),
                        report.pushed,
                        report.pulled
                    ));
                }
                CommandOutcome::Gossiped(report)
            }
            Err(e) => {
                tracing::warn!(agent = %self.id(), "gossip failed: {}", e);
                CommandOutcome::Rejected(e.to_string())
            }
        }
    }

    fn broadcast(&self, party: PartyId, entry: &Entry) {
        self.say("Broadcasting to agents I can reach.");
        self.gossip.broadcast(party, entry);
    }

    fn receive(&self, envelope: Envelope) {
        let Envelope {
            from, party, entry, ..
        } = envelope;
        let (stored, fingerprint) = self.merge_local(party, entry);
        tracing::trace!(agent = %self.id(), %from, %party, entry = %stored, "merged");
        self.say(&format!("Received delta from {from}. I now see {fingerprint}"));
        self.registry.in_flight().finish();
    }

    fn on_tick(&self) {
        let config = self.registry.config();
        if !config.autogossip {
            return;
        }
        match self.gossip.autogossip(&self.store, config.autogossip_probability) {
            Ok(Some(report)) => {
                tracing::debug!(agent = %self.id(), peers = ?report.peers, "autogossip");
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(agent = %self.id(), "autogossip failed: {}", e),
        }
    }
}

/// Opaque token, or a quorum change when a requirement is given
fn gated(base: String, requirement: Option<Requirement>) -> Entry {
    match requirement {
        Some(req) => Entry::Quorum(QuorumChange::new(base, req.threshold, req.group)),
        None => Entry::Opaque(base),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RecordingSink, RuntimeConfig};

    fn spec(s: &str) -> AgentSpec {
        s.parse().unwrap()
    }

    fn id(s: &str) -> AgentId {
        s.parse().unwrap()
    }

    async fn start(specs: &[&str]) -> (AgentRegistry, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let reg = AgentRegistry::new(RuntimeConfig::deterministic(5), sink.clone()).unwrap();
        reg.setup(specs.iter().map(|s| spec(s))).unwrap();
        (reg, sink)
    }

    #[test]
    fn test_gated() {
        let req = Requirement::parse("2@a").unwrap();
        assert_eq!(gated("#add-A.3".into(), Some(req)).canonical(), "#add-A.3 by 2@a");
        assert_eq!(gated("#beef".into(), None), Entry::Opaque("#beef".into()));
    }

    #[tokio::test]
    async fn test_simple_creates_and_broadcasts() {
        let (reg, sink) = start(&["A.1", "B.1"]).await;
        reg.submit("A.1: simple").unwrap();
        reg.settled().await;

        assert!(reg.check_all());
        let fp = reg.fingerprint(id("B.1")).unwrap();
        assert!(fp.starts_with("A=#+#"), "{fp}");
        match sink.outcome_of("A.1: simple").unwrap() {
            CommandOutcome::Created { entry, .. } => {
                let text = entry.canonical();
                let value = u32::from_str_radix(&text[1..], 16).unwrap();
                assert!((0x1000..=0x10000).contains(&value));
            }
            other => panic!("unexpected {other:?}"),
        }
        reg.shutdown().await;
    }

    #[tokio::test]
    async fn test_simple_gated_self_endorses() {
        let (reg, sink) = start(&["A.1@a", "A.2@a", "B.1"]).await;
        reg.submit("A.1: simple by 2@a").unwrap();
        reg.settled().await;

        // A.1 endorses on creation, A.2 on receipt; B.1 only stores
        let a1 = reg.store(id("A.1")).unwrap();
        let created = a1.entries(id("A.1").party)[1].as_quorum().unwrap().clone();
        assert!(created.has_endorsed(id("A.1")));
        let b1 = reg.store(id("B.1")).unwrap();
        let seen = b1.entries(id("A.1").party)[1].as_quorum().unwrap().clone();
        assert_eq!(seen.endorsers.len(), 1);
        assert!(sink.outcome_of("A.1: simple by 2@a").unwrap().is_success());
        reg.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_verb_is_unrecognized() {
        let (reg, sink) = start(&["A.1", "B.1"]).await;
        reg.submit("A.1: dance").unwrap();
        reg.settled().await;
        assert!(matches!(
            sink.outcome_of("A.1: dance"),
            Some(CommandOutcome::Unrecognized(_))
        ));
        assert!(sink.lines_for(id("A.1")).iter().any(|l| l.starts_with("Huh?")));
        reg.shutdown().await;
    }

    #[tokio::test]
    async fn test_state_reports_fingerprint() {
        let (reg, sink) = start(&["A.1", "B.1"]).await;
        reg.submit("B.1: state").unwrap();
        reg.settled().await;
        assert_eq!(
            sink.outcome_of("B.1: state"),
            Some(CommandOutcome::Reported("A=#; B=#".into()))
        );
        assert!(sink.lines_for(id("B.1")).contains(&"OK; I see A=#; B=#".to_string()));
        reg.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_loops() {
        let (reg, _sink) = start(&["A.1", "B.1"]).await;
        reg.shutdown().await;
        // commands after shutdown are never executed
        reg.submit("A.1: state").unwrap();
        tokio::task::yield_now().await;
        assert!(!reg.is_settled());
    }
}
