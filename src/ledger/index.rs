//! Per-coordinate subtree aggregates
//!
//! Every cell that holds content, directly or below it, has a node carrying
//! the summed digest, the entry count and the hash multiset of its whole
//! subtree. A write touches the written cell and its ancestors only, so
//! digest, descendant and overlap queries never scan the shard map.

use crate::digest::{add_into, sub_from, Digest, ZERO_DIGEST};
use crate::geometry::Coordinate;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
struct SubtreeNode {
    digest: Digest,
    entries: usize,
    hashes: HashMap<Digest, usize>,
}

impl SubtreeNode {
    fn add(&mut self, hash: &Digest) {
        add_into(&mut self.digest, hash);
        self.entries += 1;
        *self.hashes.entry(*hash).or_insert(0) += 1;
    }

    fn remove(&mut self, hash: &Digest) {
        sub_from(&mut self.digest, hash);
        self.entries = self.entries.saturating_sub(1);
        if let Some(count) = self.hashes.get_mut(hash) {
            *count -= 1;
            if *count == 0 {
                self.hashes.remove(hash);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct SubtreeIndex {
    nodes: HashMap<Coordinate, SubtreeNode>,
}

impl SubtreeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts `hash` at `coord` and at every ancestor of it.
    pub fn insert(&mut self, coord: Coordinate, hash: &Digest) {
        for cell in std::iter::once(coord).chain(coord.ancestors()) {
            self.nodes.entry(cell).or_default().add(hash);
        }
    }

    /// Moves one counted `hash` from `from` up to its ancestor `to`. Nodes
    /// from `to` upward already cover the hash and are left untouched.
    pub fn lift(&mut self, from: Coordinate, to: &Coordinate, hash: &Digest) {
        for cell in std::iter::once(from).chain(from.ancestors()) {
            if cell == *to {
                break;
            }
            let emptied = match self.nodes.get_mut(&cell) {
                Some(node) => {
                    node.remove(hash);
                    node.entries == 0
                }
                None => false,
            };
            if emptied {
                self.nodes.remove(&cell);
            }
        }
    }

    pub fn digest(&self, coord: &Coordinate) -> Digest {
        self.nodes
            .get(coord)
            .map(|node| node.digest)
            .unwrap_or(ZERO_DIGEST)
    }

    /// Transactions at or below `coord`.
    pub fn entries(&self, coord: &Coordinate) -> usize {
        self.nodes.get(coord).map_or(0, |node| node.entries)
    }

    pub fn contains(&self, coord: &Coordinate, hash: &Digest) -> bool {
        self.nodes
            .get(coord)
            .is_some_and(|node| node.hashes.contains_key(hash))
    }

    /// Distinct transaction hashes at or below `coord`.
    pub fn hashes<'a>(&'a self, coord: &Coordinate) -> impl Iterator<Item = &'a Digest> + 'a {
        self.nodes
            .get(coord)
            .into_iter()
            .flat_map(|node| node.hashes.keys())
    }

    /// Cells strictly below `coord` with content at or below them, found by
    /// descending only into non-empty subtrees.
    pub fn occupied_below(&self, coord: &Coordinate) -> Vec<Coordinate> {
        let mut found = Vec::new();
        let mut stack: Vec<Coordinate> = coord.children().map(Vec::from).unwrap_or_default();
        while let Some(cell) = stack.pop() {
            if self.entries(&cell) == 0 {
                continue;
            }
            found.push(cell);
            if let Some(children) = cell.children() {
                stack.extend(children);
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::hash_data;

    #[test]
    fn test_insert_reaches_every_ancestor() {
        let mut index = SubtreeIndex::new();
        let leaf = Coordinate::new(2, 0, 2);
        let h = hash_data(b"t");
        index.insert(leaf, &h);
        for cell in [leaf, Coordinate::new(1, 0, 1), Coordinate::root()] {
            assert_eq!(index.entries(&cell), 1);
            assert_eq!(index.digest(&cell), h);
            assert!(index.contains(&cell, &h));
        }
        assert_eq!(index.entries(&Coordinate::new(0, 1, 1)), 0);
    }

    #[test]
    fn test_lift_clears_cells_below_target_only() {
        let mut index = SubtreeIndex::new();
        let leaf = Coordinate::new(0, 2, 2);
        let h = hash_data(b"t");
        index.insert(leaf, &h);
        index.insert(leaf, &h);
        index.lift(leaf, &Coordinate::root(), &h);

        assert_eq!(index.entries(&leaf), 1);
        assert_eq!(index.entries(&Coordinate::root()), 2);
        index.lift(leaf, &Coordinate::root(), &h);
        assert_eq!(index.entries(&leaf), 0);
        assert_eq!(index.entries(&Coordinate::new(0, 1, 1)), 0);
        assert!(index.occupied_below(&Coordinate::root()).is_empty());
        assert_eq!(index.hashes(&Coordinate::root()).count(), 1);
    }

    #[test]
    fn test_occupied_below_skips_empty_branches() {
        let mut index = SubtreeIndex::new();
        index.insert(Coordinate::new(4, 0, 3), &hash_data(b"a"));
        let mut below = index.occupied_below(&Coordinate::root());
        below.sort();
        assert_eq!(
            below,
            vec![
                Coordinate::new(1, 0, 1),
                Coordinate::new(2, 0, 2),
                Coordinate::new(4, 0, 3)
            ]
        );
    }
}
