use crate::digest::{add_into, Digest, ZERO_DIGEST};
use crate::geometry::Coordinate;
use crate::ledger::index::SubtreeIndex;

/// Coordinate validity against a ledger depth ceiling.
pub fn is_valid_coordinate(coord: &Coordinate, max_level: u32) -> bool {
    coord.level <= max_level && coord.in_gasket()
}

/// Summed digest of every shard at or below `root`.
pub fn subtree_digest(index: &SubtreeIndex, root: &Coordinate) -> Digest {
    index.digest(root)
}

/// Aggregate digest of the three children's subtrees.
pub fn children_digest(index: &SubtreeIndex, parent: &Coordinate) -> Digest {
    let mut acc = ZERO_DIGEST;
    if let Some(children) = parent.children() {
        for child in &children {
            add_into(&mut acc, &subtree_digest(index, child));
        }
    }
    acc
}

/// Finds a transaction hash that appears under two different children of
/// `parent`. Children must partition the parent's set without overlap.
pub fn find_child_overlap(index: &SubtreeIndex, children: &[Coordinate; 3]) -> Option<Digest> {
    for (i, child) in children.iter().enumerate() {
        for hash in index.hashes(child) {
            if children[i + 1..].iter().any(|other| index.contains(other, hash)) {
                return Some(*hash);
            }
        }
    }
    None
}

/// The gasket subdivision rule for `parent`: three in-bounds, hole-free
/// children whose combined content matches the digest recorded for the
/// parent's proof. A pure predicate; every mismatch is just `false`.
pub fn subdivision_holds(
    index: &SubtreeIndex,
    recorded: Option<&Digest>,
    parent: &Coordinate,
    max_level: u32,
) -> bool {
    if !is_valid_coordinate(parent, max_level) {
        return false;
    }
    let Some(children) = parent.children() else {
        return false;
    };
    if !children.iter().all(|c| is_valid_coordinate(c, max_level)) {
        return false;
    }
    let Some(recorded) = recorded else {
        return false;
    };
    if find_child_overlap(index, &children).is_some() {
        return false;
    }
    children_digest(index, parent) == *recorded
}
