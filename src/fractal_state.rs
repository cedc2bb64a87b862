use crate::digest::Digest;
use crate::geometry::Coordinate;
use crate::miner::Proof;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Consensus progress of one coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CellStatus {
    #[default]
    Open,
    ProofSubmitted,
    Committed,
}

/// What became of an individual proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofStatus {
    Pending,
    Committed,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Finality {
    /// Not committed.
    Open,
    /// Committed, but some ancestor is not yet.
    Provisional,
    /// Committed together with every ancestor up to level 0.
    Final,
}

#[derive(Debug, Clone, Default)]
pub struct CellRecord {
    pub status: CellStatus,
    /// The proof whose `state_root` the ledger currently records.
    pub current: Option<Proof>,
    /// Competing proofs waiting for reconciliation.
    pub contenders: Vec<Proof>,
    /// Set once `synchronize` has chosen a winner; later proofs are no-ops.
    pub settled: bool,
    /// Unix milliseconds of the commit.
    pub committed_at: Option<i64>,
}

/// The consensus view of the fractal: one record per coordinate that has
/// seen a proof, plus a verdict per proof digest.
#[derive(Debug, Default)]
pub struct FractalState {
    cells: HashMap<Coordinate, CellRecord>,
    verdicts: HashMap<Digest, ProofStatus>,
}

impl FractalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, coord: &Coordinate) -> CellStatus {
        self.cells
            .get(coord)
            .map(|r| r.status)
            .unwrap_or_default()
    }

    pub fn record(&self, coord: &Coordinate) -> Option<&CellRecord> {
        self.cells.get(coord)
    }

    pub fn record_mut(&mut self, coord: &Coordinate) -> Option<&mut CellRecord> {
        self.cells.get_mut(coord)
    }

    /// The record for `coord`, created `Open` if missing.
    pub fn entry(&mut self, coord: Coordinate) -> &mut CellRecord {
        self.cells.entry(coord).or_default()
    }

    pub fn verdict(&self, digest: &Digest) -> Option<ProofStatus> {
        self.verdicts.get(digest).copied()
    }

    pub fn set_verdict(&mut self, digest: Digest, status: ProofStatus) {
        self.verdicts.insert(digest, status);
    }

    /// True once a record has a proof; such coordinates are not remined.
    pub fn has_proof(&self, coord: &Coordinate) -> bool {
        self.cells
            .get(coord)
            .map(|r| r.current.is_some())
            .unwrap_or(false)
    }

    pub fn children_committed(&self, coord: &Coordinate) -> bool {
        coord
            .children()
            .map(|children| {
                children
                    .iter()
                    .all(|c| self.status(c) == CellStatus::Committed)
            })
            .unwrap_or(false)
    }

    pub fn finality(&self, coord: &Coordinate) -> Finality {
        if self.status(coord) != CellStatus::Committed {
            return Finality::Open;
        }
        if coord
            .ancestors()
            .all(|a| self.status(&a) == CellStatus::Committed)
        {
            Finality::Final
        } else {
            Finality::Provisional
        }
    }

    /// Coordinates with a proof that `synchronize` has not settled yet,
    /// shallowest first.
    pub fn unsettled(&self) -> Vec<Coordinate> {
        let mut coords: Vec<_> = self
            .cells
            .iter()
            .filter(|(_, r)| r.current.is_some() && !r.settled)
            .map(|(c, _)| *c)
            .collect();
        coords.sort_by_key(|c| (c.level, c.y, c.x));
        coords
    }

    /// Coordinates waiting on their children, deepest first.
    pub fn pending_submissions(&self) -> Vec<Coordinate> {
        let mut coords: Vec<_> = self
            .cells
            .iter()
            .filter(|(_, r)| r.status == CellStatus::ProofSubmitted)
            .map(|(c, _)| *c)
            .collect();
        coords.sort_by_key(|c| (std::cmp::Reverse(c.level), c.y, c.x));
        coords
    }

    /// Drops every record strictly below `coord`, returning them.
    pub fn remove_descendants(&mut self, coord: &Coordinate) -> Vec<(Coordinate, CellRecord)> {
        let below: Vec<Coordinate> = self
            .cells
            .keys()
            .filter(|c| c.is_descendant_of(coord))
            .copied()
            .collect();
        below
            .into_iter()
            .filter_map(|c| self.cells.remove(&c).map(|r| (c, r)))
            .collect()
    }

    /// No orphans: every record with a proof hangs under a parent that has
    /// one too.
    pub fn is_consistent(&self) -> bool {
        self.cells.iter().all(|(coord, record)| {
            if record.current.is_none() {
                return true;
            }
            match coord.parent() {
                Some(parent) => self.has_proof(&parent),
                None => true,
            }
        })
    }

    pub fn count(&self, status: CellStatus) -> usize {
        self.cells.values().filter(|r| r.status == status).count()
    }
}
