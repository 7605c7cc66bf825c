//! Quorum merge - the join that inserts an incoming entry into a replica
//!
//! Merge pipeline for `(party, incoming)`:
//! 1. Opaque token already present: no-op
//! 2. Quorum change: join with the stored view of the same change (base,
//!    threshold and group), if any
//! 3. Local endorsement: a member of the change's group, in the owning party,
//!    adds itself (never to its own admission)
//! 4. Re-sort the party list into canonical order
//!
//! Every step is a lattice operation, so repeated, reordered or regrouped
//! deliveries all land on the same replica.

use std::collections::BTreeSet;

use peersync_core::{AgentId, GroupTag, PartyId};

use crate::{admission_base, Entry, PeerStore, QuorumChange};

/// Identity of the agent that owns the replica being merged into
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalAgent {
    pub id: AgentId,
    pub groups: BTreeSet<GroupTag>,
}

impl LocalAgent {
    pub fn new(id: AgentId, groups: impl IntoIterator<Item = GroupTag>) -> Self {
        LocalAgent {
            id,
            groups: groups.into_iter().collect(),
        }
    }

    /// Whether this agent may add its endorsement to `change` for `party`
    pub fn may_endorse(&self, party: PartyId, change: &QuorumChange) -> bool {
        party == self.id.party
            && self.groups.contains(&change.group)
            && !change.has_endorsed(self.id)
            && change.base != admission_base(self.id)
    }
}

/// What a merge did to the replica
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Already known; replica untouched
    Unchanged(Entry),
    /// New logical entry added
    Inserted(Entry),
    /// Existing logical entry replaced by its join with the incoming one
    Combined(Entry),
}

impl MergeOutcome {
    pub fn entry(&self) -> &Entry {
        match self {
            MergeOutcome::Unchanged(e) | MergeOutcome::Inserted(e) | MergeOutcome::Combined(e) => e,
        }
    }

    pub fn changed(&self) -> bool {
        !matches!(self, MergeOutcome::Unchanged(_))
    }
}

/// Merge engine bound to one replica owner
#[derive(Clone, Debug)]
pub struct QuorumMerge {
    local: Option<LocalAgent>,
}

impl QuorumMerge {
    /// Merge without any local endorsement (observers, tests)
    pub fn passive() -> Self {
        QuorumMerge { local: None }
    }

    pub fn for_agent(local: LocalAgent) -> Self {
        QuorumMerge { local: Some(local) }
    }

    /// Parse `text` at the boundary and merge it
    pub fn merge_text(&self, store: &mut PeerStore, party: PartyId, text: &str) -> MergeOutcome {
        self.merge(store, party, Entry::parse(text))
    }

    pub fn merge(&self, store: &mut PeerStore, party: PartyId, incoming: Entry) -> MergeOutcome {
        let existing = store.position_of_logical(party, &incoming);
        let list = store.list_mut(party);

        let outcome = match incoming {
            Entry::Opaque(token) => {
                if existing.is_some() {
                    return MergeOutcome::Unchanged(Entry::Opaque(token));
                }
                let entry = Entry::Opaque(token);
                list.push(entry.clone());
                MergeOutcome::Inserted(entry)
            }
            Entry::Quorum(change) => {
                let prior = existing.and_then(|i| list[i].as_quorum().cloned());
                let mut joined = match &prior {
                    Some(old) => old.join(&change),
                    None => change,
                };
                if let Some(local) = &self.local {
                    if local.may_endorse(party, &joined) {
                        joined.endorsers.insert(local.id);
                        tracing::debug!(agent = %local.id, base = %joined.base, "endorsed");
                    }
                }
                let entry = Entry::Quorum(joined);
                match (existing, prior) {
                    (Some(i), Some(old)) => {
                        if Entry::Quorum(old) == entry {
                            return MergeOutcome::Unchanged(entry);
                        }
                        list[i] = entry.clone();
                        MergeOutcome::Combined(entry)
                    }
                    _ => {
                        list.push(entry.clone());
                        MergeOutcome::Inserted(entry)
                    }
                }
            }
        };

        list.sort();
        outcome
    }
}
