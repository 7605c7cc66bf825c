//! Peer store - one agent's replica of every party's delta list

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use peersync_core::PartyId;

use crate::Entry;

/// Per-agent lock around a replica
pub type SharedPeerStore = Arc<Mutex<PeerStore>>;

/// Replica: party -> canonically sorted, logically deduplicated entries
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PeerStore {
    parties: BTreeMap<PartyId, Vec<Entry>>,
}

impl PeerStore {
    pub fn new() -> Self {
        PeerStore::default()
    }

    pub fn into_shared(self) -> SharedPeerStore {
        Arc::new(Mutex::new(self))
    }

    /// Start a list holding only the genesis marker for each unknown party
    pub fn init_parties(&mut self, parties: impl IntoIterator<Item = PartyId>) {
        for party in parties {
            self.parties.entry(party).or_insert_with(|| vec![Entry::genesis()]);
        }
    }

    pub fn parties(&self) -> impl Iterator<Item = PartyId> + '_ {
        self.parties.keys().copied()
    }

    pub fn entries(&self, party: PartyId) -> &[Entry] {
        self.parties.get(&party).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (PartyId, &Entry)> {
        self.parties
            .iter()
            .flat_map(|(party, entries)| entries.iter().map(move |e| (*party, e)))
    }

    /// Exact (canonical) membership
    pub fn contains(&self, party: PartyId, entry: &Entry) -> bool {
        self.entries(party).contains(entry)
    }

    /// Position of the entry for the same logical change, if any
    pub fn position_of_logical(&self, party: PartyId, entry: &Entry) -> Option<usize> {
        self.entries(party).iter().position(|e| e.same_logical(entry))
    }

    /// Mutable list for a party, created with the genesis marker if absent
    pub(crate) fn list_mut(&mut self, party: PartyId) -> &mut Vec<Entry> {
        self.parties.entry(party).or_insert_with(|| vec![Entry::genesis()])
    }

    pub fn len(&self) -> usize {
        self.parties.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.parties.values().all(Vec::is_empty)
    }

    /// `A.1` style fingerprint of a single party: entries joined by `+`
    pub fn party_fingerprint(&self, party: PartyId) -> String {
        self.entries(party)
            .iter()
            .map(Entry::canonical)
            .collect::<Vec<_>>()
            .join("+")
    }

    /// `A=#+#1f2e; B=#` - every party in order
    pub fn fingerprint(&self) -> String {
        self.parties
            .keys()
            .map(|party| format!("{party}={}", self.party_fingerprint(*party)))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Clone a shared replica under its lock
pub fn snapshot(store: &SharedPeerStore) -> PeerStore {
    store.lock().clone()
}
