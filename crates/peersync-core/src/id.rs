//! Identity types for peersync
//!
//! Parties are single letters, agents are `<party>.<number>` with a number in
//! `1..=9`, and group tags are single lowercase letters. The compact forms
//! keep fingerprints short and make the canonical sort order obvious.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{SyncError, SyncResult};

/// Party identity - one independent participant owning a delta list
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartyId(char);

impl PartyId {
    /// Party letters are case-insensitive on input and stored upper-case.
    pub fn new(letter: char) -> SyncResult<Self> {
        if letter.is_ascii_alphabetic() {
            Ok(PartyId(letter.to_ascii_uppercase()))
        } else {
            Err(SyncError::InvalidAgentSpec(format!(
                "party must be a letter, got {letter:?}"
            )))
        }
    }

    #[inline]
    pub fn letter(self) -> char {
        self.0
    }
}

impl fmt::Debug for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Party({})", self.0)
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PartyId {
    type Err = SyncError;

    fn from_str(s: &str) -> SyncResult<Self> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => PartyId::new(c),
            _ => Err(SyncError::InvalidAgentSpec(format!("bad party {s:?}"))),
        }
    }
}

/// Agent identity - `<party>.<number>`
///
/// Derived ordering (party, then number) matches the lexical order of the
/// textual form, which the canonical entry sort relies on.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId {
    pub party: PartyId,
    pub number: u8,
}

impl AgentId {
    pub fn new(party: PartyId, number: u8) -> SyncResult<Self> {
        if (1..=9).contains(&number) {
            Ok(AgentId { party, number })
        } else {
            Err(SyncError::InvalidAgentSpec(format!(
                "agent number must be 1-9, got {number}"
            )))
        }
    }
}

impl fmt::Debug for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Agent({}.{})", self.party, self.number)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.party, self.number)
    }
}

impl FromStr for AgentId {
    type Err = SyncError;

    fn from_str(s: &str) -> SyncResult<Self> {
        let bad = || SyncError::InvalidAgentSpec(format!("bad agent id {s:?}"));
        let bytes = s.as_bytes();
        if bytes.len() != 3 || bytes[1] != b'.' {
            return Err(bad());
        }
        let party = PartyId::new(bytes[0] as char).map_err(|_| bad())?;
        let number = match bytes[2] {
            d @ b'1'..=b'9' => d - b'0',
            _ => return Err(bad()),
        };
        AgentId::new(party, number)
    }
}

/// Group tag - names an endorsement group (`@a`)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupTag(char);

impl GroupTag {
    pub fn new(tag: char) -> SyncResult<Self> {
        if tag.is_ascii_lowercase() {
            Ok(GroupTag(tag))
        } else {
            Err(SyncError::InvalidAgentSpec(format!(
                "group must be a lowercase letter, got {tag:?}"
            )))
        }
    }

    #[inline]
    pub fn tag(self) -> char {
        self.0
    }
}

impl fmt::Debug for GroupTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Group({})", self.0)
    }
}

impl fmt::Display for GroupTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Full agent specification: `A.1@ab-B.2,C.3`
///
/// - `@ab` places the agent in groups `a` and `b`
/// - `-B.2,C.3` lists agents this one cannot reach
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentSpec {
    pub id: AgentId,
    pub groups: BTreeSet<GroupTag>,
    pub unreachable: BTreeSet<AgentId>,
}

impl AgentSpec {
    pub fn new(id: AgentId) -> Self {
        AgentSpec {
            id,
            groups: BTreeSet::new(),
            unreachable: BTreeSet::new(),
        }
    }

    pub fn with_groups(mut self, groups: impl IntoIterator<Item = GroupTag>) -> Self {
        self.groups.extend(groups);
        self
    }

    pub fn with_unreachable(mut self, peers: impl IntoIterator<Item = AgentId>) -> Self {
        self.unreachable.extend(peers);
        self
    }

    pub fn in_group(&self, group: GroupTag) -> bool {
        self.groups.contains(&group)
    }
}

impl fmt::Display for AgentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)?;
        if !self.groups.is_empty() {
            f.write_str("@")?;
            for g in &self.groups {
                write!(f, "{g}")?;
            }
        }
        if !self.unreachable.is_empty() {
            let peers: Vec<String> = self.unreachable.iter().map(|p| p.to_string()).collect();
            write!(f, "-{}", peers.join(","))?;
        }
        Ok(())
    }
}

impl FromStr for AgentSpec {
    type Err = SyncError;

    fn from_str(s: &str) -> SyncResult<Self> {
        let s = s.trim();
        let (head, unreachable) = match s.split_once('-') {
            Some((head, rest)) => (head, Some(rest)),
            None => (s, None),
        };
        let (id, groups) = match head.split_once('@') {
            Some((id, groups)) => (id, Some(groups)),
            None => (head, None),
        };

        let mut spec = AgentSpec::new(id.parse()?);
        if let Some(groups) = groups {
            if groups.is_empty() {
                return Err(SyncError::InvalidAgentSpec(format!("empty group list in {s:?}")));
            }
            for c in groups.chars() {
                spec.groups.insert(GroupTag::new(c)?);
            }
        }
        if let Some(peers) = unreachable {
            for peer in peers.split(',') {
                spec.unreachable.insert(peer.trim().parse()?);
            }
        }
        Ok(spec)
    }
}
