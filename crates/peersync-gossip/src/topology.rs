//! Topology - which agents can talk to each other
//!
//! Reachability is an undirected graph over registered agents. Every pair
//! is connected unless either side excludes the other; exclusions model
//! network partitions and can be added and healed at runtime.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use peersync_core::{AgentId, AgentSpec};

/// Partition map: members plus per-agent exclusion lists
#[derive(Debug, Clone, Default)]
pub struct PartitionMap {
    members: BTreeSet<AgentId>,
    exclusions: BTreeMap<AgentId, BTreeSet<AgentId>>,
}

impl PartitionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent along with the static exclusions from its spec
    pub fn add_member(&mut self, spec: &AgentSpec) {
        self.members.insert(spec.id);
        if !spec.unreachable.is_empty() {
            self.exclusions
                .entry(spec.id)
                .or_default()
                .extend(spec.unreachable.iter().copied());
        }
    }

    pub fn is_member(&self, agent: AgentId) -> bool {
        self.members.contains(&agent)
    }

    pub fn members(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.members.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Cut the edge between `a` and `b`
    pub fn exclude(&mut self, a: AgentId, b: AgentId) {
        self.exclusions.entry(a).or_default().insert(b);
    }

    /// Restore the edge between `a` and `b`, whichever side cut it
    pub fn heal(&mut self, a: AgentId, b: AgentId) {
        if let Some(set) = self.exclusions.get_mut(&a) {
            set.remove(&b);
        }
        if let Some(set) = self.exclusions.get_mut(&b) {
            set.remove(&a);
        }
    }

    /// Drop every exclusion
    pub fn heal_all(&mut self) {
        self.exclusions.clear();
    }

    fn excludes(&self, from: AgentId, to: AgentId) -> bool {
        self.exclusions
            .get(&from)
            .map(|set| set.contains(&to))
            .unwrap_or(false)
    }

    /// Whether a direct edge exists between two distinct members
    pub fn can_reach(&self, from: AgentId, to: AgentId) -> bool {
        from != to
            && self.is_member(from)
            && self.is_member(to)
            && !self.excludes(from, to)
            && !self.excludes(to, from)
    }

    /// Direct neighbours of `agent`, in id order
    pub fn reachable(&self, agent: AgentId) -> Vec<AgentId> {
        self.members
            .iter()
            .copied()
            .filter(|other| self.can_reach(agent, *other))
            .collect()
    }

    /// Connected components of the reachability graph, each sorted, ordered
    /// by their smallest member
    pub fn components(&self) -> Vec<BTreeSet<AgentId>> {
        let mut seen = BTreeSet::new();
        let mut components = Vec::new();

        for &start in &self.members {
            if !seen.insert(start) {
                continue;
            }
            let mut component = BTreeSet::from([start]);
            let mut queue = VecDeque::from([start]);
            while let Some(node) = queue.pop_front() {
                for next in self.reachable(node) {
                    if seen.insert(next) {
                        component.insert(next);
                        queue.push_back(next);
                    }
                }
            }
            components.push(component);
        }

        components
    }

    /// Whether every member can reach every other, possibly via relays
    pub fn is_connected(&self) -> bool {
        self.components().len() <= 1
    }

    /// Whether `a` and `b` sit in the same component
    pub fn same_component(&self, a: AgentId, b: AgentId) -> bool {
        self.components()
            .iter()
            .any(|c| c.contains(&a) && c.contains(&b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(s: &str) -> AgentSpec {
        s.parse().unwrap()
    }

    fn id(s: &str) -> AgentId {
        s.parse().unwrap()
    }

    fn map(specs: &[&str]) -> PartitionMap {
        let mut map = PartitionMap::new();
        for s in specs {
            map.add_member(&spec(s));
        }
        map
    }

    #[test]
    fn test_full_mesh() {
        let map = map(&["A.1", "A.2", "B.1"]);
        assert_eq!(map.reachable(id("A.1")), vec![id("A.2"), id("B.1")]);
        assert!(map.is_connected());
        assert!(!map.can_reach(id("A.1"), id("A.1")));
    }

    #[test]
    fn test_exclusion_is_symmetric() {
        let map = map(&["A.1-B.1", "A.2", "B.1"]);
        assert!(!map.can_reach(id("A.1"), id("B.1")));
        assert!(!map.can_reach(id("B.1"), id("A.1")));
        assert_eq!(map.reachable(id("B.1")), vec![id("A.2")]);
        // still connected through A.2
        assert!(map.is_connected());
    }

    #[test]
    fn test_components_and_heal() {
        let mut map = map(&["A.1-B.1,B.2", "A.2-B.1,B.2", "B.1", "B.2"]);
        let components = map.components();
        assert_eq!(components.len(), 2);
        assert_eq!(components[0], BTreeSet::from([id("A.1"), id("A.2")]));
        assert!(!map.same_component(id("A.1"), id("B.2")));

        map.heal(id("B.1"), id("A.1"));
        assert!(map.can_reach(id("A.1"), id("B.1")));
        assert!(map.is_connected());
    }

    #[test]
    fn test_runtime_exclusion() {
        let mut map = map(&["A.1", "B.1"]);
        map.exclude(id("A.1"), id("B.1"));
        assert!(!map.is_connected());
        map.heal_all();
        assert!(map.is_connected());
    }

    #[test]
    fn test_unknown_agent_unreachable() {
        let map = map(&["A.1"]);
        assert!(!map.can_reach(id("A.1"), id("Z.9")));
        assert!(map.reachable(id("Z.9")).is_empty());
    }
}
