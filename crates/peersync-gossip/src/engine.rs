//! Gossip engine - broadcast and pairwise anti-entropy for one agent
//!
//! The engine never merges into another agent's replica directly. Both
//! directions of an exchange become envelopes: entries the peer lacks go to
//! the peer's mailbox, entries we lack come back through our own.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use peersync_core::{AgentId, PartyId, SyncError, SyncResult};
use peersync_state::{snapshot, Entry, SharedPeerStore};

use crate::{missing_entries, Envelope, Mailbox};

/// Handle on a peer as seen from the directory
#[derive(Clone)]
pub struct PeerLink {
    pub id: AgentId,
    pub mailbox: Mailbox,
    pub store: SharedPeerStore,
}

/// Lookup of agents and their current reachability
pub trait PeerDirectory: Send + Sync {
    /// Links to every agent `from` can reach right now
    fn reachable(&self, from: AgentId) -> Vec<PeerLink>;

    /// Link to a single agent, reachable or not
    fn link(&self, id: AgentId) -> Option<PeerLink>;
}

/// Result of one gossip round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GossipReport {
    /// Peers exchanged with, in id order
    pub peers: Vec<AgentId>,
    /// Entries sent to peers
    pub pushed: usize,
    /// Entries requested from peers
    pub pulled: usize,
}

/// Gossip engine owned by one agent
pub struct GossipEngine {
    me: AgentId,
    directory: Arc<dyn PeerDirectory>,
    max_delay: Duration,
    rng: Mutex<StdRng>,
}

impl GossipEngine {
    /// `seed` makes delivery delays and autogossip choices reproducible
    pub fn new(
        me: AgentId,
        directory: Arc<dyn PeerDirectory>,
        max_delay: Duration,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ agent_salt(me)),
            None => StdRng::from_entropy(),
        };
        GossipEngine {
            me,
            directory,
            max_delay,
            rng: Mutex::new(rng),
        }
    }

    pub fn agent(&self) -> AgentId {
        self.me
    }

    /// Simulated network latency for one delivery
    fn delay(&self) -> Duration {
        if self.max_delay.is_zero() {
            return Duration::ZERO;
        }
        let max = self.max_delay.as_micros() as u64;
        Duration::from_micros(self.rng.lock().gen_range(0..=max))
    }

    /// Push `entry` once to every reachable peer. Returns the peers targeted.
    pub fn broadcast(&self, party: PartyId, entry: &Entry) -> Vec<AgentId> {
        let peers = self.directory.reachable(self.me);
        for peer in &peers {
            peer.mailbox.post(
                Envelope::broadcast(self.me, party, entry.clone()),
                self.delay(),
            );
        }
        tracing::debug!(agent = %self.me, %party, %entry, peers = peers.len(), "broadcast");
        peers.iter().map(|p| p.id).collect()
    }

    /// Anti-entropy with `targets` (all reachable peers when `None`).
    /// Targets that are unknown or unreachable are skipped.
    pub fn gossip(&self, own: &SharedPeerStore, targets: Option<&[AgentId]>) -> SyncResult<GossipReport> {
        let me = self
            .directory
            .link(self.me)
            .ok_or(SyncError::UnknownAgent(self.me))?;

        let peers: Vec<PeerLink> = self
            .directory
            .reachable(self.me)
            .into_iter()
            .filter(|p| targets.map_or(true, |t| t.contains(&p.id)))
            .collect();

        let mut report = GossipReport::default();
        for peer in &peers {
            let (pushed, pulled) = self.exchange(own, &me.mailbox, peer);
            report.peers.push(peer.id);
            report.pushed += pushed;
            report.pulled += pulled;
        }
        tracing::debug!(
            agent = %self.me,
            peers = report.peers.len(),
            pushed = report.pushed,
            pulled = report.pulled,
            "gossip round"
        );
        Ok(report)
    }

    /// One bidirectional exchange. Each replica is snapshotted under its own
    /// lock; no two locks are ever held together.
    fn exchange(&self, own: &SharedPeerStore, own_mailbox: &Mailbox, peer: &PeerLink) -> (usize, usize) {
        let mine = snapshot(own);
        let theirs = snapshot(&peer.store);

        let to_peer = missing_entries(&mine, &theirs);
        let to_me = missing_entries(&theirs, &mine);

        for (party, entry) in &to_peer {
            tracing::trace!(agent = %self.me, peer = %peer.id, %party, %entry, "push");
            peer.mailbox
                .post(Envelope::gossip(self.me, *party, entry.clone()), self.delay());
        }
        for (party, entry) in &to_me {
            own_mailbox.post(Envelope::gossip(peer.id, *party, entry.clone()), self.delay());
        }
        (to_peer.len(), to_me.len())
    }

    /// With probability `p`, gossip with one random reachable peer
    pub fn autogossip(&self, own: &SharedPeerStore, p: f64) -> SyncResult<Option<GossipReport>> {
        let target = {
            let mut rng = self.rng.lock();
            if !rng.gen_bool(p.clamp(0.0, 1.0)) {
                return Ok(None);
            }
            let peers = self.directory.reachable(self.me);
            match peers.choose(&mut *rng) {
                Some(peer) => peer.id,
                None => return Ok(None),
            }
        };
        self.gossip(own, Some(&[target])).map(Some)
    }
}

fn agent_salt(id: AgentId) -> u64 {
    ((id.party.letter() as u64) << 8) | id.number as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InFlight, Inbox, PartitionMap};
    use parking_lot::RwLock;
    use peersync_core::AgentSpec;
    use peersync_state::{PeerStore, QuorumMerge};
    use std::collections::BTreeMap;

    struct TestDirectory {
        links: BTreeMap<AgentId, PeerLink>,
        partitions: RwLock<PartitionMap>,
    }

    impl PeerDirectory for TestDirectory {
        fn reachable(&self, from: AgentId) -> Vec<PeerLink> {
            let partitions = self.partitions.read();
            partitions
                .reachable(from)
                .into_iter()
                .filter_map(|id| self.links.get(&id).cloned())
                .collect()
        }

        fn link(&self, id: AgentId) -> Option<PeerLink> {
            self.links.get(&id).cloned()
        }
    }

    fn id(s: &str) -> AgentId {
        s.parse().unwrap()
    }

    fn party(c: char) -> PartyId {
        PartyId::new(c).unwrap()
    }

    fn setup(specs: &[&str]) -> (Arc<TestDirectory>, BTreeMap<AgentId, Inbox>) {
        let in_flight = InFlight::new();
        let mut links = BTreeMap::new();
        let mut inboxes = BTreeMap::new();
        let mut partitions = PartitionMap::new();
        for s in specs {
            let spec: AgentSpec = s.parse().unwrap();
            let (mailbox, inbox) = Mailbox::channel(spec.id, 16, in_flight.clone());
            let mut store = PeerStore::new();
            store.init_parties([party('A'), party('B')]);
            links.insert(
                spec.id,
                PeerLink {
                    id: spec.id,
                    mailbox,
                    store: store.into_shared(),
                },
            );
            inboxes.insert(spec.id, inbox);
            partitions.add_member(&spec);
        }
        let dir = TestDirectory {
            links,
            partitions: RwLock::new(partitions),
        };
        (Arc::new(dir), inboxes)
    }

    async fn drain(dir: &TestDirectory, inboxes: &mut BTreeMap<AgentId, Inbox>) -> usize {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        let merge = QuorumMerge::passive();
        let mut applied = 0;
        for (id, inbox) in inboxes.iter_mut() {
            while let Ok(env) = inbox.try_recv() {
                let store = &dir.links[id].store;
                merge.merge(&mut store.lock(), env.party, env.entry);
                applied += 1;
            }
        }
        applied
    }

    #[tokio::test]
    async fn test_broadcast_respects_partitions() {
        let (dir, mut inboxes) = setup(&["A.1-B.1", "A.2", "B.1"]);
        let engine = GossipEngine::new(id("A.1"), dir.clone(), Duration::ZERO, Some(7));
        let targets = engine.broadcast(party('A'), &Entry::parse("#beef"));
        assert_eq!(targets, vec![id("A.2")]);

        assert_eq!(drain(&dir, &mut inboxes).await, 1);
        assert_eq!(dir.links[&id("A.2")].store.lock().party_fingerprint(party('A')), "#+#beef");
        assert_eq!(dir.links[&id("B.1")].store.lock().party_fingerprint(party('A')), "#");
    }

    #[tokio::test]
    async fn test_gossip_is_bidirectional() {
        let (dir, mut inboxes) = setup(&["A.1", "B.1"]);
        let merge = QuorumMerge::passive();
        merge.merge_text(&mut dir.links[&id("A.1")].store.lock(), party('A'), "#1000");
        merge.merge_text(&mut dir.links[&id("B.1")].store.lock(), party('B'), "#2000");

        let a1 = dir.links[&id("A.1")].store.clone();
        let engine = GossipEngine::new(id("A.1"), dir.clone(), Duration::ZERO, Some(7));
        let report = engine.gossip(&a1, None).unwrap();
        assert_eq!(report.peers, vec![id("B.1")]);
        assert_eq!((report.pushed, report.pulled), (1, 1));

        drain(&dir, &mut inboxes).await;
        let fp_a = dir.links[&id("A.1")].store.lock().fingerprint();
        let fp_b = dir.links[&id("B.1")].store.lock().fingerprint();
        assert_eq!(fp_a, "A=#+#1000; B=#+#2000");
        assert_eq!(fp_a, fp_b);

        // a second round has nothing left to move
        let again = engine.gossip(&a1, None).unwrap();
        assert_eq!((again.pushed, again.pulled), (0, 0));
    }

    #[tokio::test]
    async fn test_gossip_skips_unreachable_targets() {
        let (dir, _inboxes) = setup(&["A.1-B.1", "B.1"]);
        let a1 = dir.links[&id("A.1")].store.clone();
        let engine = GossipEngine::new(id("A.1"), dir.clone(), Duration::ZERO, None);
        let report = engine.gossip(&a1, Some(&[id("B.1")])).unwrap();
        assert!(report.peers.is_empty());
    }

    #[tokio::test]
    async fn test_autogossip_probability_bounds() {
        let (dir, _inboxes) = setup(&["A.1", "B.1"]);
        let a1 = dir.links[&id("A.1")].store.clone();
        let engine = GossipEngine::new(id("A.1"), dir.clone(), Duration::ZERO, Some(1));
        assert_eq!(engine.autogossip(&a1, 0.0).unwrap(), None);
        let report = engine.autogossip(&a1, 1.0).unwrap().unwrap();
        assert_eq!(report.peers, vec![id("B.1")]);
    }

    #[tokio::test]
    async fn test_unknown_self_is_error() {
        let (dir, _inboxes) = setup(&["A.1", "B.1"]);
        let store = PeerStore::new().into_shared();
        let engine = GossipEngine::new(id("C.1"), dir, Duration::ZERO, None);
        assert!(matches!(
            engine.gossip(&store, None),
            Err(SyncError::UnknownAgent(_))
        ));
    }
}
