//! Thread-safe shard store for the triangular ledger
//!
//! All shard mutation happens under one `RwLock`. Readers take the shared
//! side and copy out what they need, so a reader never observes half of a
//! concurrent append or merge.

use crate::config::LedgerConfig;
use crate::digest::Digest;
use crate::error::{ChainError, Result};
use crate::geometry::{Coordinate, MAX_SUPPORTED_LEVEL};
use crate::ledger::index::SubtreeIndex;
use crate::ledger::shard::Shard;
use crate::ledger::validation;
use crate::transaction::Transaction;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Default)]
struct LedgerInner {
    shards: BTreeMap<Coordinate, Shard>,
    /// Subtree aggregates, updated along the ancestor chain on every write.
    subtrees: SubtreeIndex,
    /// Digest carried by the proof consensus accepted for a coordinate.
    recorded: HashMap<Coordinate, Digest>,
    /// Coordinates with an in-flight proof; never pruned.
    pinned: HashSet<Coordinate>,
}

pub struct TriangularLedger {
    max_level: u32,
    inner: RwLock<LedgerInner>,
}

impl TriangularLedger {
    /// Create a ledger whose cells go at most `max_level` subdivisions deep.
    /// Depths beyond [`MAX_SUPPORTED_LEVEL`] are clamped.
    pub fn new(max_level: u32) -> Self {
        Self {
            max_level: max_level.min(MAX_SUPPORTED_LEVEL),
            inner: RwLock::new(LedgerInner::default()),
        }
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(config.max_level)
    }

    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    pub fn is_valid_coordinate(&self, coord: &Coordinate) -> bool {
        validation::is_valid_coordinate(coord, self.max_level)
    }

    // ------------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------------

    /// Append a transaction to the shard at `coord`, creating the shard on
    /// first use. The ledger takes ownership of the record.
    pub fn add_transaction(&self, tx: Transaction, coord: Coordinate) -> Result<()> {
        if !self.is_valid_coordinate(&coord) {
            return Err(ChainError::InvalidCoordinate(coord));
        }
        let hash = tx.hash();
        let mut inner = self.inner.write();
        inner.subtrees.insert(coord, &hash);
        inner.shards.entry(coord).or_default().push_hashed(tx, hash);
        Ok(())
    }

    /// All transactions at `coord` in append order; empty for an absent shard.
    pub fn get_transactions(&self, coord: &Coordinate) -> Vec<Transaction> {
        let inner = self.inner.read();
        inner
            .shards
            .get(coord)
            .map(Shard::transactions)
            .unwrap_or_default()
    }

    /// The prefix of the shard sealed by consensus.
    pub fn committed_transactions(&self, coord: &Coordinate) -> Vec<Transaction> {
        let inner = self.inner.read();
        inner
            .shards
            .get(coord)
            .map(Shard::committed)
            .unwrap_or_default()
    }

    pub fn seal(&self, coord: &Coordinate) {
        let mut inner = self.inner.write();
        if let Some(shard) = inner.shards.get_mut(coord) {
            shard.seal();
        }
    }

    // ------------------------------------------------------------------------
    // Digests
    // ------------------------------------------------------------------------

    pub fn shard_digest(&self, coord: &Coordinate) -> Digest {
        let inner = self.inner.read();
        inner
            .shards
            .get(coord)
            .map(Shard::digest)
            .unwrap_or(crate::digest::ZERO_DIGEST)
    }

    pub fn subtree_digest(&self, coord: &Coordinate) -> Digest {
        let inner = self.inner.read();
        validation::subtree_digest(&inner.subtrees, coord)
    }

    /// Aggregate content digest of the three children of `parent`.
    pub fn children_digest(&self, parent: &Coordinate) -> Digest {
        let inner = self.inner.read();
        validation::children_digest(&inner.subtrees, parent)
    }

    pub fn record_digest(&self, coord: Coordinate, digest: Digest) {
        self.inner.write().recorded.insert(coord, digest);
    }

    pub fn recorded_digest(&self, coord: &Coordinate) -> Option<Digest> {
        self.inner.read().recorded.get(coord).copied()
    }

    pub fn clear_recorded(&self, coord: &Coordinate) {
        self.inner.write().recorded.remove(coord);
    }

    // ------------------------------------------------------------------------
    // Geometry
    // ------------------------------------------------------------------------

    /// True iff the three children of `parent` are valid gasket cells and
    /// their combined content matches the digest recorded for `parent`.
    /// Never fails: any geometric or digest mismatch is `false`.
    pub fn validate_subdivision(&self, parent: &Coordinate) -> bool {
        let inner = self.inner.read();
        validation::subdivision_holds(
            &inner.subtrees,
            inner.recorded.get(parent),
            parent,
            self.max_level,
        )
    }

    /// Whether any non-empty shard lies strictly below `coord`.
    pub fn has_descendants(&self, coord: &Coordinate) -> bool {
        let inner = self.inner.read();
        let own = inner.shards.get(coord).map_or(0, Shard::len);
        inner.subtrees.entries(coord) > own
    }

    /// Finality compaction: moves every transaction below `parent` into the
    /// parent's shard, child by child, shallower shards first. The parent's
    /// subtree digest is unchanged. Returns the number of moved transactions.
    pub fn merge_children(&self, parent: &Coordinate) -> Result<usize> {
        if !self.is_valid_coordinate(parent) {
            return Err(ChainError::InvalidCoordinate(*parent));
        }
        let children = parent
            .children()
            .ok_or(ChainError::InvalidCoordinate(*parent))?;

        let mut inner = self.inner.write();
        let LedgerInner {
            shards, subtrees, ..
        } = &mut *inner;
        let mut sources: Vec<(usize, Coordinate)> = subtrees
            .occupied_below(parent)
            .into_iter()
            .filter(|coord| shards.get(coord).is_some_and(|shard| !shard.is_empty()))
            .filter_map(|coord| {
                children
                    .iter()
                    .position(|child| coord.is_within(child))
                    .map(|idx| (idx, coord))
            })
            .collect();
        sources.sort_by_key(|(idx, c)| (*idx, c.level, c.y, c.x));

        let mut moved = Vec::new();
        for (_, coord) in &sources {
            if let Some(shard) = shards.get_mut(coord) {
                let entries = shard.drain();
                for entry in &entries {
                    subtrees.lift(*coord, parent, &entry.hash);
                }
                moved.extend(entries);
            }
        }
        let count = moved.len();
        if count > 0 {
            shards.entry(*parent).or_default().absorb(moved);
        }
        debug!(parent = %parent, moved = count, shards = sources.len(), "ledger.merge_children");
        Ok(count)
    }

    // ------------------------------------------------------------------------
    // Housekeeping
    // ------------------------------------------------------------------------

    pub fn pin(&self, coord: Coordinate) {
        self.inner.write().pinned.insert(coord);
    }

    pub fn unpin(&self, coord: &Coordinate) {
        self.inner.write().pinned.remove(coord);
    }

    pub fn is_pinned(&self, coord: &Coordinate) -> bool {
        self.inner.read().pinned.contains(coord)
    }

    /// Remove shards holding zero transactions, skipping pinned coordinates.
    /// Returns how many shards were removed.
    pub fn prune_empty_shards(&self) -> usize {
        let mut inner = self.inner.write();
        let LedgerInner { shards, pinned, .. } = &mut *inner;
        let before = shards.len();
        shards.retain(|coord, shard| !shard.is_empty() || pinned.contains(coord));
        let removed = before - shards.len();
        if removed > 0 {
            debug!(removed, remaining = shards.len(), "ledger.prune_empty_shards");
        }
        removed
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    /// Coordinates of every non-empty shard, in coordinate order.
    pub fn occupied_coordinates(&self) -> Vec<Coordinate> {
        let inner = self.inner.read();
        inner
            .shards
            .iter()
            .filter(|(_, shard)| !shard.is_empty())
            .map(|(coord, _)| *coord)
            .collect()
    }

    pub fn shard_count(&self) -> usize {
        self.inner.read().shards.len()
    }

    pub fn transaction_count(&self) -> usize {
        self.inner.read().shards.values().map(Shard::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(label: &str) -> Transaction {
        Transaction::new().with_field("label", label)
    }

    #[test]
    fn test_add_and_get_in_order() {
        let ledger = TriangularLedger::new(4);
        let coord = Coordinate::new(1, 0, 1);
        ledger.add_transaction(tx("a"), coord).unwrap();
        ledger.add_transaction(tx("b"), coord).unwrap();
        assert_eq!(ledger.get_transactions(&coord), vec![tx("a"), tx("b")]);
        assert!(ledger.get_transactions(&Coordinate::new(0, 1, 1)).is_empty());
    }

    #[test]
    fn test_rejects_cells_past_max_level() {
        let ledger = TriangularLedger::new(1);
        let err = ledger
            .add_transaction(tx("deep"), Coordinate::new(0, 0, 2))
            .unwrap_err();
        assert_eq!(err, ChainError::InvalidCoordinate(Coordinate::new(0, 0, 2)));
    }

    #[test]
    fn test_pinned_empty_shard_survives_prune() {
        let ledger = TriangularLedger::new(3);
        let root = Coordinate::root();
        let child = Coordinate::new(0, 0, 1);
        ledger.add_transaction(tx("x"), child).unwrap();
        // Leaves an empty shard behind at `child`.
        ledger.merge_children(&root).unwrap();
        assert_eq!(ledger.shard_count(), 2);

        ledger.pin(child);
        assert_eq!(ledger.prune_empty_shards(), 0);
        ledger.unpin(&child);
        assert_eq!(ledger.prune_empty_shards(), 1);
    }

    #[test]
    fn test_merge_children_preserves_subtree_digest() {
        let ledger = TriangularLedger::new(3);
        let root = Coordinate::root();
        let [a, b, c] = root.children().unwrap();
        let deep = a.children().unwrap()[1];
        ledger.add_transaction(tx("root"), root).unwrap();
        ledger.add_transaction(tx("c"), c).unwrap();
        ledger.add_transaction(tx("a"), a).unwrap();
        ledger.add_transaction(tx("deep"), deep).unwrap();
        ledger.add_transaction(tx("b"), b).unwrap();
        let before = ledger.subtree_digest(&root);

        assert_eq!(ledger.merge_children(&root).unwrap(), 4);
        assert_eq!(ledger.subtree_digest(&root), before);
        assert_eq!(
            ledger.get_transactions(&root),
            vec![tx("root"), tx("a"), tx("deep"), tx("b"), tx("c")]
        );
        assert!(ledger.get_transactions(&a).is_empty());
        assert!(!ledger.has_descendants(&root));
    }

    #[test]
    fn test_subtree_index_matches_full_scan() {
        let ledger = TriangularLedger::new(3);
        let root = Coordinate::root();
        let cells = [
            root,
            Coordinate::new(1, 0, 1),
            Coordinate::new(0, 2, 2),
            Coordinate::new(0, 6, 3),
            Coordinate::new(4, 0, 3),
        ];
        for (i, cell) in cells.iter().enumerate() {
            ledger.add_transaction(tx(&format!("t{}", i)), *cell).unwrap();
            ledger.add_transaction(tx("shared"), *cell).unwrap();
        }

        let scan = |ledger: &TriangularLedger, of: &Coordinate| {
            let inner = ledger.inner.read();
            let digests: Vec<Digest> = inner
                .shards
                .iter()
                .filter(|(c, _)| c.is_within(of))
                .map(|(_, shard)| shard.digest())
                .collect();
            crate::digest::aggregate(digests.iter())
        };
        for cell in cells.iter().chain(Coordinate::new(0, 1, 1).children().unwrap().iter()) {
            assert_eq!(ledger.subtree_digest(cell), scan(&ledger, cell), "{}", cell);
        }

        let mid = Coordinate::new(0, 1, 1);
        ledger.merge_children(&mid).unwrap();
        assert!(!ledger.has_descendants(&mid));
        assert!(ledger.has_descendants(&root));
        for cell in cells.iter().chain([mid].iter()) {
            assert_eq!(ledger.subtree_digest(cell), scan(&ledger, cell), "{}", cell);
        }
    }

    #[test]
    fn test_seal_exposes_committed_prefix() {
        let ledger = TriangularLedger::new(2);
        let coord = Coordinate::root();
        ledger.add_transaction(tx("one"), coord).unwrap();
        ledger.seal(&coord);
        ledger.add_transaction(tx("two"), coord).unwrap();
        assert_eq!(ledger.committed_transactions(&coord), vec![tx("one")]);
        assert_eq!(ledger.transaction_count(), 2);
    }
}
