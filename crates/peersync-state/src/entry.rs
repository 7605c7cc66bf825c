//! Replica entries
//!
//! An entry is either an opaque token (`#`, `#1f2e`) or a quorum-gated change
//! whose text carries its endorsements:
//!
//! | form            | text                          |
//! |-----------------|-------------------------------|
//! | unendorsed      | `base by 2@a`                 |
//! | identity set    | `base by {A.1,A.2}/2@a`       |
//! | counter         | `base,1/2@a` (deprecated)     |
//! | counter + set   | `base,1 by {A.2}/2@a`         |
//!
//! Text is parsed once at the boundary. Anything that does not parse as a
//! quorum change is kept as an opaque token; malformed input is never an
//! error.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use peersync_core::{AgentId, GroupTag};

/// Marker every party list starts with
pub const GENESIS_MARKER: &str = "#";

/// Base of the change that admits `agent`
pub fn admission_base(agent: AgentId) -> String {
    format!("#add-{agent}")
}

/// An m-of-n change of some group
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QuorumChange {
    /// Identifies the operation independent of who endorsed it
    pub base: String,
    /// Agents known to have endorsed
    pub endorsers: BTreeSet<AgentId>,
    /// Endorsements known only by count (deprecated counter form)
    pub anonymous: u32,
    /// Endorsements required
    pub threshold: u8,
    pub group: GroupTag,
}

impl QuorumChange {
    pub fn new(base: impl Into<String>, threshold: u8, group: GroupTag) -> Self {
        QuorumChange {
            base: base.into(),
            endorsers: BTreeSet::new(),
            anonymous: 0,
            threshold,
            group,
        }
    }

    pub fn endorsed_by(mut self, agents: impl IntoIterator<Item = AgentId>) -> Self {
        self.endorsers.extend(agents);
        self
    }

    /// Effective number of endorsements
    pub fn endorsement_count(&self) -> usize {
        self.endorsers.len().max(self.anonymous as usize)
    }

    pub fn is_satisfied(&self) -> bool {
        self.endorsement_count() >= self.threshold as usize
    }

    pub fn has_endorsed(&self, agent: AgentId) -> bool {
        self.endorsers.contains(&agent)
    }

    /// Same operation under the same requirement. Base, threshold and group
    /// together identify a change; endorsements are only its state.
    pub fn same_change(&self, other: &QuorumChange) -> bool {
        self.base == other.base && self.threshold == other.threshold && self.group == other.group
    }

    /// Lattice join of two views of the same change.
    ///
    /// Endorser sets union, counters take the max. Only defined for
    /// views where [`QuorumChange::same_change`] holds.
    pub fn join(&self, other: &QuorumChange) -> QuorumChange {
        debug_assert!(self.same_change(other));
        QuorumChange {
            base: self.base.clone(),
            endorsers: self.endorsers.union(&other.endorsers).copied().collect(),
            anonymous: self.anonymous.max(other.anonymous),
            threshold: self.threshold,
            group: self.group,
        }
    }

    /// Parse the quorum forms; `None` means the text is opaque
    pub fn parse(text: &str) -> Option<QuorumChange> {
        let (rest, group) = text.rsplit_once('@')?;
        let mut group_chars = group.chars();
        let group = match (group_chars.next(), group_chars.next()) {
            (Some(c), None) => GroupTag::new(c).ok()?,
            _ => return None,
        };

        let digits_at = rest
            .char_indices()
            .rev()
            .take_while(|(_, c)| c.is_ascii_digit())
            .last()
            .map(|(i, _)| i)?;
        let threshold: u8 = rest[digits_at..].parse().ok().filter(|n| *n > 0)?;
        let head = &rest[..digits_at];

        let mut change = if let Some(base) = head.strip_suffix(" by ") {
            QuorumChange::new(base, threshold, group)
        } else if let Some(head) = head.strip_suffix("}/") {
            let (prefix, ids) = head.rsplit_once(" by {")?;
            let mut endorsers = BTreeSet::new();
            for id in ids.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                endorsers.insert(id.parse().ok()?);
            }
            let (base, anonymous) = split_counter(prefix);
            let mut change = QuorumChange::new(base, threshold, group);
            change.endorsers = endorsers;
            change.anonymous = anonymous;
            change
        } else if let Some(head) = head.strip_suffix('/') {
            let (base, anonymous) = split_counter(head);
            if anonymous == 0 && !head.ends_with(",0") {
                return None;
            }
            let mut change = QuorumChange::new(base, threshold, group);
            change.anonymous = anonymous;
            change
        } else {
            return None;
        };

        if change.base.is_empty() {
            return None;
        }
        change.base = change.base.trim_end().to_string();
        Some(change)
    }
}

/// Split a trailing `,M` counter off a base
fn split_counter(text: &str) -> (&str, u32) {
    match text.rsplit_once(',') {
        Some((base, count)) if !count.is_empty() && count.bytes().all(|b| b.is_ascii_digit()) => {
            (base, count.parse().unwrap_or(u32::MAX))
        }
        _ => (text, 0),
    }
}

impl fmt::Display for QuorumChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base)?;
        if self.anonymous > 0 {
            write!(f, ",{}", self.anonymous)?;
        }
        if self.endorsers.is_empty() {
            if self.anonymous > 0 {
                write!(f, "/{}@{}", self.threshold, self.group)
            } else {
                write!(f, " by {}@{}", self.threshold, self.group)
            }
        } else {
            let ids: Vec<String> = self.endorsers.iter().map(|a| a.to_string()).collect();
            write!(f, " by {{{}}}/{}@{}", ids.join(","), self.threshold, self.group)
        }
    }
}

/// One item in a party's replica list
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Entry {
    Opaque(String),
    Quorum(QuorumChange),
}

impl Entry {
    pub fn parse(text: &str) -> Entry {
        let text = text.trim();
        match QuorumChange::parse(text) {
            Some(change) => Entry::Quorum(change),
            None => Entry::Opaque(text.to_string()),
        }
    }

    pub fn genesis() -> Entry {
        Entry::Opaque(GENESIS_MARKER.to_string())
    }

    pub fn as_quorum(&self) -> Option<&QuorumChange> {
        match self {
            Entry::Quorum(q) => Some(q),
            Entry::Opaque(_) => None,
        }
    }

    pub fn canonical(&self) -> String {
        self.to_string()
    }

    /// Whether `other` is the same logical change (same token, or same
    /// quorum change regardless of endorsements)
    pub fn same_logical(&self, other: &Entry) -> bool {
        match (self, other) {
            (Entry::Opaque(a), Entry::Opaque(b)) => a == b,
            (Entry::Quorum(a), Entry::Quorum(b)) => a.same_change(b),
            _ => false,
        }
    }

    /// Token, or quorum base
    fn key(&self) -> &str {
        match self {
            Entry::Opaque(token) => token,
            Entry::Quorum(change) => &change.base,
        }
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::Opaque(token) => f.write_str(token),
            Entry::Quorum(change) => write!(f, "{change}"),
        }
    }
}

impl From<&str> for Entry {
    fn from(text: &str) -> Self {
        Entry::parse(text)
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Token or base first, opaque before quorum, then the requirement and the
/// endorsements. Consistent with `Eq`.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(other.key()).then_with(|| match (self, other) {
            (Entry::Opaque(_), Entry::Opaque(_)) => Ordering::Equal,
            (Entry::Opaque(_), Entry::Quorum(_)) => Ordering::Less,
            (Entry::Quorum(_), Entry::Opaque(_)) => Ordering::Greater,
            (Entry::Quorum(a), Entry::Quorum(b)) => (a.group, a.threshold, a.anonymous, &a.endorsers)
                .cmp(&(b.group, b.threshold, b.anonymous, &b.endorsers)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(s: &str) -> AgentId {
        s.parse().unwrap()
    }

    fn group(c: char) -> GroupTag {
        GroupTag::new(c).unwrap()
    }

    #[test]
    fn test_opaque_tokens() {
        assert_eq!(Entry::parse("#"), Entry::genesis());
        assert_eq!(Entry::parse("#1f2e"), Entry::Opaque("#1f2e".into()));
        assert_eq!(Entry::parse("garbage @@ 2@"), Entry::Opaque("garbage @@ 2@".into()));
    }

    #[test]
    fn test_unendorsed_form() {
        let q = QuorumChange::parse("#1f2e by 2@a").unwrap();
        assert_eq!(q.base, "#1f2e");
        assert!(q.endorsers.is_empty());
        assert_eq!(q.threshold, 2);
        assert_eq!(q.group, group('a'));
        assert_eq!(q.to_string(), "#1f2e by 2@a");
    }

    #[test]
    fn test_identity_set_form() {
        let q = QuorumChange::parse("#add-A.3 by {B.1,A.2}/2@a").unwrap();
        assert_eq!(q.base, "#add-A.3");
        assert_eq!(q.endorsers.len(), 2);
        assert!(q.is_satisfied());
        // endorsers are rendered sorted
        assert_eq!(q.to_string(), "#add-A.3 by {A.2,B.1}/2@a");
    }

    #[test]
    fn test_counter_form() {
        let q = QuorumChange::parse("#beef,1/3@b").unwrap();
        assert_eq!(q.base, "#beef");
        assert_eq!(q.anonymous, 1);
        assert_eq!(q.endorsement_count(), 1);
        assert_eq!(q.to_string(), "#beef,1/3@b");
    }

    #[test]
    fn test_mixed_form() {
        let q = QuorumChange::parse("#beef,2 by {A.1}/3@b").unwrap();
        assert_eq!(q.anonymous, 2);
        assert!(q.has_endorsed(agent("A.1")));
        assert_eq!(q.endorsement_count(), 2);
        assert_eq!(q.to_string(), "#beef,2 by {A.1}/3@b");
    }

    #[test]
    fn test_empty_set_canonicalizes() {
        let q = QuorumChange::parse("#x by {}/2@a").unwrap();
        assert_eq!(q.to_string(), "#x by 2@a");
    }

    #[test]
    fn test_rejects_malformed_quorum_text() {
        assert!(QuorumChange::parse("#x by 0@a").is_none());
        assert!(QuorumChange::parse("#x by 2@A").is_none());
        assert!(QuorumChange::parse("#x by {Z.0}/2@a").is_none());
        assert!(QuorumChange::parse(" by 2@a").is_none());
        assert!(QuorumChange::parse("#x 2@a").is_none());
        assert!(QuorumChange::parse("#x/2@a").is_none());
    }

    #[test]
    fn test_join_unions_endorsers() {
        let a = QuorumChange::new("#x", 2, group('a')).endorsed_by([agent("A.1")]);
        let b = QuorumChange::new("#x", 2, group('a')).endorsed_by([agent("A.2")]);
        let joined = a.join(&b);
        assert_eq!(joined.endorsement_count(), 2);
        assert_eq!(joined, b.join(&a));
        assert_eq!(joined.join(&a), joined);
    }

    #[test]
    fn test_join_counter_does_not_double_count() {
        let a = QuorumChange::parse("#x,1/2@a").unwrap();
        let twice = a.join(&a);
        assert_eq!(twice.endorsement_count(), 1);
    }

    #[test]
    fn test_same_logical() {
        let a = Entry::parse("#x by 2@a");
        let b = Entry::parse("#x by {A.1}/2@a");
        assert!(a.same_logical(&b));
        assert!(!a.same_logical(&Entry::parse("#x")));
        // a different requirement is a different change
        assert!(!a.same_logical(&Entry::parse("#x by 2@b")));
        assert!(!a.same_logical(&Entry::parse("#x by 3@a")));
    }

    #[test]
    fn test_order_by_key_then_requirement() {
        let mut entries = vec![
            Entry::parse("#b"),
            Entry::parse("#a by {A.1}/2@b"),
            Entry::parse("#a by 2@b"),
            Entry::parse("#a by 3@a"),
            Entry::parse("#a"),
            Entry::genesis(),
        ];
        entries.sort();
        let text: Vec<String> = entries.iter().map(Entry::canonical).collect();
        assert_eq!(
            text,
            vec!["#", "#a", "#a by 3@a", "#a by 2@b", "#a by {A.1}/2@b", "#b"]
        );
    }

    #[test]
    fn test_order_agrees_with_eq() {
        let a = Entry::parse("#x,1 by {A.1}/2@a");
        let b = Entry::parse("#x,1 by {A.1}/2@a");
        let c = Entry::parse("#x,2 by {A.1}/2@a");
        assert_eq!(a.cmp(&b), Ordering::Equal);
        assert_ne!(a.cmp(&c), Ordering::Equal);
    }
}
