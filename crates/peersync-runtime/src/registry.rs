//! Agent registry
//!
//! The registry is the context every agent shares: the command feed, the
//! partition map, the mailboxes and replicas of all agents, and the
//! in-flight counter used to await quiescence. It is an explicit object
//! (cheap to clone, one per simulation) rather than process-wide state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use peersync_core::{AgentId, AgentSpec, PartyId, SyncError, SyncResult};
use peersync_gossip::{InFlight, Mailbox, PartitionMap, PeerDirectory, PeerLink};
use peersync_state::{snapshot, PeerStore, SharedPeerStore};

use crate::{describe, Agent, CommandFeed, RuntimeConfig, StatusSink, VerbTable};

/// Registry entry for a running agent
struct AgentHandle {
    spec: AgentSpec,
    mailbox: Mailbox,
    store: SharedPeerStore,
    cursor: Arc<AtomicUsize>,
}

impl AgentHandle {
    fn link(&self) -> PeerLink {
        PeerLink {
            id: self.spec.id,
            mailbox: self.mailbox.clone(),
            store: self.store.clone(),
        }
    }
}

/// Point-in-time view of one agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInfo {
    pub spec: AgentSpec,
    pub fingerprint: String,
    pub description: String,
}

struct Inner {
    config: RuntimeConfig,
    verbs: VerbTable,
    feed: CommandFeed,
    sink: Arc<dyn StatusSink>,
    in_flight: Arc<InFlight>,
    agents: RwLock<BTreeMap<AgentId, AgentHandle>>,
    partitions: RwLock<PartitionMap>,
    parties: RwLock<BTreeSet<PartyId>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

/// Shared handle on every agent of one simulation
#[derive(Clone)]
pub struct AgentRegistry {
    inner: Arc<Inner>,
}

impl AgentRegistry {
    pub fn new(config: RuntimeConfig, sink: Arc<dyn StatusSink>) -> SyncResult<Self> {
        config.validate()?;
        let (shutdown, _) = watch::channel(false);
        Ok(AgentRegistry {
            inner: Arc::new(Inner {
                config,
                verbs: VerbTable::standard(),
                feed: CommandFeed::new(),
                sink,
                in_flight: InFlight::new(),
                agents: RwLock::new(BTreeMap::new()),
                partitions: RwLock::new(PartitionMap::new()),
                parties: RwLock::new(BTreeSet::new()),
                tasks: Mutex::new(Vec::new()),
                shutdown,
            }),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn feed(&self) -> &CommandFeed {
        &self.inner.feed
    }

    pub(crate) fn verbs(&self) -> &VerbTable {
        &self.inner.verbs
    }

    pub(crate) fn sink(&self) -> &dyn StatusSink {
        self.inner.sink.as_ref()
    }

    pub(crate) fn in_flight(&self) -> &InFlight {
        &self.inner.in_flight
    }

    /// Parse a command line and append it to the feed
    pub fn submit(&self, line: &str) -> SyncResult<usize> {
        self.inner.feed.push_line(line)
    }

    /// Start the initial agents. Needs at least two agents spread over at
    /// least two parties; every agent starts knowing every party.
    pub fn setup(&self, specs: impl IntoIterator<Item = AgentSpec>) -> SyncResult<Vec<AgentId>> {
        let specs: Vec<AgentSpec> = specs.into_iter().collect();
        if specs.len() < 2 {
            return Err(SyncError::InvalidConfig(format!(
                "need at least 2 agents, got {}",
                specs.len()
            )));
        }
        let parties: BTreeSet<PartyId> = specs.iter().map(|s| s.id.party).collect();
        if parties.len() < 2 {
            return Err(SyncError::InvalidConfig(format!(
                "need at least 2 parties, got {}",
                parties.len()
            )));
        }
        let mut seen = BTreeSet::new();
        for spec in &specs {
            if !seen.insert(spec.id) || self.contains(spec.id) {
                return Err(SyncError::DuplicateAgent(spec.id));
            }
        }

        self.init_parties(parties);
        specs.into_iter().map(|spec| self.register(spec)).collect()
    }

    /// Make `parties` known to every current and future agent
    pub fn init_parties(&self, parties: impl IntoIterator<Item = PartyId>) {
        let added: Vec<PartyId> = {
            let mut known = self.inner.parties.write();
            parties.into_iter().filter(|p| known.insert(*p)).collect()
        };
        if added.is_empty() {
            return;
        }
        for handle in self.inner.agents.read().values() {
            handle.store.lock().init_parties(added.iter().copied());
        }
        tracing::debug!(parties = ?added, "parties initialised");
    }

    /// Start an agent with a fresh replica of every known party. It reads
    /// the command feed from the beginning.
    pub fn register(&self, spec: AgentSpec) -> SyncResult<AgentId> {
        let mut store = PeerStore::new();
        store.init_parties(self.inner.parties.read().iter().copied());
        self.spawn(spec, store, 0)
    }

    /// Start an admitted agent seeded with a copy of its sponsor's replica;
    /// it reads the command feed from `cursor` on.
    pub(crate) fn admit(&self, spec: AgentSpec, store: PeerStore, cursor: usize) -> SyncResult<AgentId> {
        self.spawn(spec, store, cursor)
    }

    fn spawn(&self, spec: AgentSpec, store: PeerStore, cursor: usize) -> SyncResult<AgentId> {
        let runtime = Handle::try_current()
            .map_err(|e| SyncError::InvalidConfig(format!("agents need a tokio runtime: {e}")))?;
        let id = spec.id;
        let (mailbox, inbox) =
            Mailbox::channel(id, self.inner.config.mailbox_capacity, self.inner.in_flight.clone());
        let store = store.into_shared();
        let cursor = Arc::new(AtomicUsize::new(cursor));

        {
            let mut agents = self.inner.agents.write();
            if agents.contains_key(&id) {
                return Err(SyncError::DuplicateAgent(id));
            }
            agents.insert(
                id,
                AgentHandle {
                    spec: spec.clone(),
                    mailbox,
                    store: store.clone(),
                    cursor: cursor.clone(),
                },
            );
        }
        self.inner.partitions.write().add_member(&spec);

        let agent = Agent::new(spec, store, cursor, self.clone());
        let shutdown = self.inner.shutdown.subscribe();
        let task = runtime.spawn(agent.run(inbox, shutdown));
        self.inner.tasks.lock().push(task);
        tracing::info!(agent = %id, "agent registered");
        Ok(id)
    }

    pub fn contains(&self, id: AgentId) -> bool {
        self.inner.agents.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.agents.read().is_empty()
    }

    pub fn get(&self, id: AgentId) -> Option<AgentInfo> {
        self.inner.agents.read().get(&id).map(agent_info)
    }

    /// Every agent in id order, snapshotted under the registry lock
    pub fn list(&self) -> Vec<AgentInfo> {
        self.inner.agents.read().values().map(agent_info).collect()
    }

    pub fn fingerprint(&self, id: AgentId) -> Option<String> {
        self.inner
            .agents
            .read()
            .get(&id)
            .map(|h| h.store.lock().fingerprint())
    }

    /// Snapshot of one agent's replica
    pub fn store(&self, id: AgentId) -> Option<PeerStore> {
        self.inner.agents.read().get(&id).map(|h| snapshot(&h.store))
    }

    /// Whether every agent reports the same fingerprint
    pub fn check_all(&self) -> bool {
        let agents = self.inner.agents.read();
        let mut fingerprints = agents.values().map(|h| h.store.lock().fingerprint());
        match fingerprints.next() {
            Some(first) => fingerprints.all(|fp| fp == first),
            None => true,
        }
    }

    /// Cut the link between two agents
    pub fn exclude(&self, a: AgentId, b: AgentId) -> SyncResult<()> {
        for id in [a, b] {
            if !self.contains(id) {
                return Err(SyncError::UnknownAgent(id));
            }
        }
        self.inner.partitions.write().exclude(a, b);
        tracing::info!(%a, %b, "partition");
        Ok(())
    }

    /// Restore the link between two agents
    pub fn heal(&self, a: AgentId, b: AgentId) {
        self.inner.partitions.write().heal(a, b);
        tracing::info!(%a, %b, "healed");
    }

    pub fn heal_all(&self) {
        self.inner.partitions.write().heal_all();
    }

    /// Connected components of the current reachability graph
    pub fn components(&self) -> Vec<BTreeSet<AgentId>> {
        self.inner.partitions.read().components()
    }

    /// Every agent has walked the whole feed and nothing is in flight
    pub fn is_settled(&self) -> bool {
        let len = self.inner.feed.len();
        // cursors first: a command's deliveries are counted before its
        // agent advances past it
        let caught_up = self
            .inner
            .agents
            .read()
            .values()
            .all(|h| h.cursor.load(Ordering::SeqCst) >= len);
        caught_up && self.inner.in_flight.pending() == 0
    }

    /// Wait until [`AgentRegistry::is_settled`] holds
    pub async fn settled(&self) {
        loop {
            let activity = self.inner.in_flight.activity().notified();
            tokio::pin!(activity);
            activity.as_mut().enable();
            if self.is_settled() {
                return;
            }
            activity.await;
        }
    }

    /// Stop every agent loop and wait for them to exit
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("agent task failed: {}", e);
            }
        }
        tracing::info!(
            agents = self.len(),
            dropped = self.dropped_deliveries(),
            "registry shut down"
        );
    }

    /// Deliveries lost to full or closed mailboxes since startup
    pub fn dropped_deliveries(&self) -> usize {
        self.inner.in_flight.dropped()
    }
}

fn agent_info(handle: &AgentHandle) -> AgentInfo {
    let store = snapshot(&handle.store);
    AgentInfo {
        spec: handle.spec.clone(),
        fingerprint: store.fingerprint(),
        description: describe(&handle.spec, &store),
    }
}

impl PeerDirectory for AgentRegistry {
    fn reachable(&self, from: AgentId) -> Vec<PeerLink> {
        let ids = self.inner.partitions.read().reachable(from);
        let agents = self.inner.agents.read();
        ids.into_iter()
            .filter_map(|id| agents.get(&id).map(AgentHandle::link))
            .collect()
    }

    fn link(&self, id: AgentId) -> Option<PeerLink> {
        self.inner.agents.read().get(&id).map(AgentHandle::link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecordingSink;

    fn spec(s: &str) -> AgentSpec {
        s.parse().unwrap()
    }

    fn registry() -> AgentRegistry {
        AgentRegistry::new(RuntimeConfig::deterministic(11), Arc::new(RecordingSink::new())).unwrap()
    }

    #[tokio::test]
    async fn test_setup_requires_two_parties() {
        let reg = registry();
        assert!(matches!(
            reg.setup([spec("A.1")]),
            Err(SyncError::InvalidConfig(_))
        ));
        assert!(matches!(
            reg.setup([spec("A.1"), spec("A.2")]),
            Err(SyncError::InvalidConfig(_))
        ));
        assert!(matches!(
            reg.setup([spec("A.1"), spec("B.1"), spec("a.1")]),
            Err(SyncError::DuplicateAgent(_))
        ));
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn test_setup_seeds_all_parties() {
        let reg = registry();
        let ids = reg.setup([spec("A.1@a"), spec("B.1-A.1")]).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(reg.check_all());
        let info = reg.get(ids[1]).unwrap();
        assert_eq!(info.fingerprint, "A=#; B=#");
        assert_eq!(info.description, "B.1-A.1 => A=#; B=#");
        assert_eq!(reg.components().len(), 2);
        reg.shutdown().await;
    }

    #[tokio::test]
    async fn test_register_duplicate() {
        let reg = registry();
        reg.setup([spec("A.1"), spec("B.1")]).unwrap();
        assert!(matches!(reg.register(spec("A.1")), Err(SyncError::DuplicateAgent(_))));
        reg.shutdown().await;
    }

    #[tokio::test]
    async fn test_exclude_unknown_agent() {
        let reg = registry();
        reg.setup([spec("A.1"), spec("B.1")]).unwrap();
        let err = reg
            .exclude("A.1".parse().unwrap(), "C.1".parse().unwrap())
            .unwrap_err();
        assert!(matches!(err, SyncError::UnknownAgent(_)));
        reg.shutdown().await;
    }

    #[tokio::test]
    async fn test_settled_with_empty_feed() {
        let reg = registry();
        reg.setup([spec("A.1"), spec("B.1")]).unwrap();
        reg.settled().await;
        assert!(reg.is_settled());
        reg.shutdown().await;
    }

    #[test]
    fn test_spawn_outside_runtime_is_error() {
        let reg = registry();
        assert!(matches!(
            reg.setup([spec("A.1"), spec("B.1")]),
            Err(SyncError::InvalidConfig(_))
        ));
    }
}
