//! Adjacency between regions plus a cache of computed edge strengths.
//!
//! Neighbor sets are kept symmetric by construction: every mutation
//! goes through [`EdgeTable::link`] or [`EdgeTable::unlink`], which
//! touch both endpoints.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::types::RegionId;

/// An unordered pair of adjacent regions, stored smaller id first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegionEdge {
    a: RegionId,
    b: RegionId,
}

impl RegionEdge {
    /// Normalize `(x, y)` into an edge. Order of arguments is irrelevant.
    #[must_use]
    pub fn new(x: RegionId, y: RegionId) -> Self {
        Self {
            a: x.min(y),
            b: x.max(y),
        }
    }

    /// The smaller id.
    #[must_use]
    pub const fn a(self) -> RegionId {
        self.a
    }

    /// The larger id.
    #[must_use]
    pub const fn b(self) -> RegionId {
        self.b
    }
}

/// Region adjacency and cached edge strengths.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeTable {
    neighbors: HashMap<RegionId, BTreeSet<RegionId>>,
    strength: HashMap<RegionEdge, f32>,
}

impl EdgeTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Neighbors of `id` in ascending order, or `None` for an unknown id.
    #[must_use]
    pub fn neighbors(&self, id: RegionId) -> Option<&BTreeSet<RegionId>> {
        self.neighbors.get(&id)
    }

    /// Register `id` with an empty neighbor set if it is not known yet.
    pub fn insert_region(&mut self, id: RegionId) {
        self.neighbors.entry(id).or_default();
    }

    /// Add `x <-> y`. Self-links are ignored.
    pub fn link(&mut self, x: RegionId, y: RegionId) {
        if x == y {
            return;
        }
        self.neighbors.entry(x).or_default().insert(y);
        self.neighbors.entry(y).or_default().insert(x);
    }

    /// Remove `x <-> y` if present.
    pub fn unlink(&mut self, x: RegionId, y: RegionId) {
        if let Some(set) = self.neighbors.get_mut(&x) {
            set.remove(&y);
        }
        if let Some(set) = self.neighbors.get_mut(&y) {
            set.remove(&x);
        }
    }

    /// Drop `id` and every link and cached strength that references it.
    pub fn remove_region(&mut self, id: RegionId) {
        self.invalidate(id);
        if let Some(set) = self.neighbors.remove(&id) {
            for n in set {
                if let Some(other) = self.neighbors.get_mut(&n) {
                    other.remove(&id);
                }
            }
        }
    }

    /// Drop every cached strength of an edge incident to `id`.
    pub fn invalidate(&mut self, id: RegionId) {
        if let Some(set) = self.neighbors.get(&id) {
            for &n in set {
                self.strength.remove(&RegionEdge::new(id, n));
            }
        }
    }

    /// Cached strength of the edge between `x` and `y`.
    #[must_use]
    pub fn strength(&self, x: RegionId, y: RegionId) -> Option<f32> {
        self.strength.get(&RegionEdge::new(x, y)).copied()
    }

    /// Cache the strength of the edge between `x` and `y`.
    pub fn set_strength(&mut self, x: RegionId, y: RegionId, strength: f32) {
        self.strength.insert(RegionEdge::new(x, y), strength);
    }

    /// Number of cached strengths.
    #[must_use]
    pub fn cached_strengths(&self) -> usize {
        self.strength.len()
    }

    /// Every edge exactly once, in ascending order.
    #[must_use]
    pub fn edges(&self) -> Vec<RegionEdge> {
        let mut edges: Vec<RegionEdge> = self
            .neighbors
            .iter()
            .flat_map(|(&id, set)| {
                set.iter()
                    .filter(move |&&n| id < n)
                    .map(move |&n| RegionEdge::new(id, n))
            })
            .collect();
        edges.sort_unstable();
        edges
    }

    /// Returns `true` when every link appears in both directions.
    #[must_use]
    pub fn is_symmetric(&self) -> bool {
        self.neighbors.iter().all(|(id, set)| {
            set.iter().all(|n| {
                n != id
                    && self
                        .neighbors
                        .get(n)
                        .is_some_and(|back| back.contains(id))
            })
        })
    }

    /// Returns `true` if no cached strength references a missing link.
    #[must_use]
    pub fn strengths_are_live(&self) -> bool {
        self.strength.keys().all(|e| {
            self.neighbors
                .get(&e.a)
                .is_some_and(|set| set.contains(&e.b))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> RegionId {
        RegionId::new(n)
    }

    #[test]
    fn edge_is_normalized() {
        assert_eq!(RegionEdge::new(id(5), id(2)), RegionEdge::new(id(2), id(5)));
        assert_eq!(RegionEdge::new(id(5), id(2)).a(), id(2));
    }

    #[test]
    fn link_is_symmetric_and_ignores_self() {
        let mut t = EdgeTable::new();
        t.link(id(1), id(2));
        t.link(id(3), id(3));
        assert!(t.neighbors(id(1)).unwrap_or(&BTreeSet::new()).contains(&id(2)));
        assert!(t.neighbors(id(2)).unwrap_or(&BTreeSet::new()).contains(&id(1)));
        assert!(t.neighbors(id(3)).is_none());
        assert!(t.is_symmetric());
    }

    #[test]
    fn remove_region_clears_links_and_strengths() {
        let mut t = EdgeTable::new();
        t.link(id(1), id(2));
        t.link(id(2), id(3));
        t.set_strength(id(2), id(3), 0.5);
        t.set_strength(id(1), id(2), 0.25);
        t.remove_region(id(2));
        assert!(t.neighbors(id(2)).is_none());
        assert!(t.neighbors(id(1)).is_some_and(BTreeSet::is_empty));
        assert_eq!(t.strength(id(3), id(2)), None);
        assert_eq!(t.cached_strengths(), 0);
        assert!(t.is_symmetric());
    }

    #[test]
    fn invalidate_keeps_unrelated_strengths() {
        let mut t = EdgeTable::new();
        t.link(id(1), id(2));
        t.link(id(3), id(4));
        t.set_strength(id(1), id(2), 0.1);
        t.set_strength(id(3), id(4), 0.2);
        t.invalidate(id(1));
        assert_eq!(t.strength(id(1), id(2)), None);
        assert_eq!(t.strength(id(4), id(3)), Some(0.2));
        assert!(t.strengths_are_live());
    }

    #[test]
    fn edges_lists_each_pair_once() {
        let mut t = EdgeTable::new();
        t.link(id(3), id(1));
        t.link(id(1), id(2));
        assert_eq!(
            t.edges(),
            vec![RegionEdge::new(id(1), id(2)), RegionEdge::new(id(1), id(3))]
        );
    }
}
