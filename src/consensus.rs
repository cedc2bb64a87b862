//! Fractal consensus
//!
//! Turns miner proofs into committed ledger state. Commits cascade upward:
//! a coordinate with content below it commits only after its three children
//! have, and the root commit is final. All decisions happen under one mutex;
//! ledger calls are made while holding it, never the other way around.

use crate::config::Config;
use crate::difficulty::DifficultyCurve;
use crate::digest::ZERO_DIGEST;
use crate::error::{ChainError, Result};
use crate::fractal_state::{CellRecord, CellStatus, Finality, FractalState, ProofStatus};
use crate::geometry::Coordinate;
use crate::ledger::TriangularLedger;
use crate::miner::{verify_proof, CancelRegistry, Proof};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counters for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsensusStats {
    pub proposals: u64,
    pub accepted: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub commits: u64,
    pub cascades: u64,
    pub reconciliations: u64,
    pub resets: u64,
}

struct ConsensusInner {
    state: FractalState,
    stats: ConsensusStats,
}

/// Pick the winning proof: smallest `(digest, nonce, elapsed_time)`. Total
/// and independent of the order proofs arrived in.
pub fn select_winner<'a, I>(proofs: I) -> Option<&'a Proof>
where
    I: IntoIterator<Item = &'a Proof>,
{
    proofs.into_iter().min_by_key(|p| p.rank())
}

pub struct FractalConsensus {
    ledger: Arc<TriangularLedger>,
    cancel: Arc<CancelRegistry>,
    curve: DifficultyCurve,
    inner: Mutex<ConsensusInner>,
}

impl FractalConsensus {
    pub fn new(
        ledger: Arc<TriangularLedger>,
        cancel: Arc<CancelRegistry>,
        curve: DifficultyCurve,
    ) -> Self {
        Self {
            ledger,
            cancel,
            curve,
            inner: Mutex::new(ConsensusInner {
                state: FractalState::new(),
                stats: ConsensusStats::default(),
            }),
        }
    }

    pub fn from_config(
        ledger: Arc<TriangularLedger>,
        cancel: Arc<CancelRegistry>,
        config: &Config,
    ) -> Self {
        Self::new(ledger, cancel, DifficultyCurve::from_config(&config.miner))
    }

    pub fn ledger(&self) -> &Arc<TriangularLedger> {
        &self.ledger
    }

    pub fn cancel_registry(&self) -> &Arc<CancelRegistry> {
        &self.cancel
    }

    // ------------------------------------------------------------------------
    // Proposals
    // ------------------------------------------------------------------------

    /// Validate `proof` against the ledger geometry and stage it.
    ///
    /// The first valid proof for a coordinate becomes its current proof and
    /// records its `state_root` in the ledger; a coordinate with no content
    /// below it commits at once and the upward cascade runs. Later proofs for
    /// the same coordinate contend until the next [`synchronize`]. Proofs for
    /// settled coordinates, and repeated proofs, are no-ops.
    ///
    /// [`synchronize`]: FractalConsensus::synchronize
    pub fn propose_block(&self, proof: Proof) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.stats.proposals += 1;
        let coord = proof.coord;

        match inner.state.verdict(&proof.digest) {
            Some(ProofStatus::Rejected) => {
                return Err(ChainError::InvalidGeometry(format!(
                    "proof {} at {} was already rejected",
                    proof.digest_hex(),
                    coord
                )));
            }
            Some(_) => {
                inner.stats.duplicates += 1;
                debug!(coord = %coord, digest = %proof.digest_hex(), "consensus.duplicate");
                return Ok(());
            }
            None => {}
        }
        if inner.state.record(&coord).map(|r| r.settled).unwrap_or(false) {
            inner.stats.duplicates += 1;
            debug!(coord = %coord, "consensus.already_settled");
            return Ok(());
        }

        if let Err(err) = self.check_proof(&proof) {
            inner.state.set_verdict(proof.digest, ProofStatus::Rejected);
            inner.stats.rejected += 1;
            warn!(coord = %coord, nonce = proof.nonce, error = %err, "consensus.proposal_rejected");
            return Err(err);
        }
        inner.stats.accepted += 1;
        inner.state.set_verdict(proof.digest, ProofStatus::Pending);

        let record = inner.state.entry(coord);
        if record.current.is_some() {
            record.contenders.push(proof);
            debug!(coord = %coord, contenders = record.contenders.len(), "consensus.contending");
            return Ok(());
        }
        record.status = CellStatus::ProofSubmitted;
        let state_root = proof.state_root;
        record.current = Some(proof);
        self.ledger.record_digest(coord, state_root);
        self.ledger.pin(coord);
        debug!(coord = %coord, "consensus.proof_submitted");

        if self.try_commit(&mut inner, coord) {
            self.cascade(&mut inner, coord);
        }
        Ok(())
    }

    /// Geometry first, then the work itself, then whether the children
    /// digest the proof commits to is still the ledger's.
    fn check_proof(&self, proof: &Proof) -> Result<()> {
        let coord = proof.coord;
        if !self.ledger.is_valid_coordinate(&coord) {
            return Err(ChainError::InvalidGeometry(format!(
                "{} is not a gasket cell",
                coord
            )));
        }
        let ancestor = match coord.parent() {
            Some(parent) => {
                if !self.ledger.validate_subdivision(&parent) {
                    return Err(ChainError::InvalidGeometry(format!(
                        "subdivision of {} does not match its recorded digest",
                        parent
                    )));
                }
                self.ledger.recorded_digest(&parent).unwrap_or(ZERO_DIGEST)
            }
            None => ZERO_DIGEST,
        };
        verify_proof(proof, &ancestor, &self.curve)?;
        if proof.state_root != self.ledger.children_digest(&coord) {
            return Err(ChainError::InvalidGeometry(format!(
                "proof {} at {} commits to a stale children digest",
                proof.digest_hex(),
                coord
            )));
        }
        Ok(())
    }

    /// Commit `coord` if it is waiting and ready: immediately when nothing
    /// lies below it, otherwise once its three children are committed and
    /// the subdivision still holds. Children are merged into the parent as
    /// part of the same step.
    fn try_commit(&self, inner: &mut ConsensusInner, coord: Coordinate) -> bool {
        if inner.state.status(&coord) != CellStatus::ProofSubmitted {
            return false;
        }
        if self.ledger.has_descendants(&coord) {
            if !inner.state.children_committed(&coord) || !self.ledger.validate_subdivision(&coord)
            {
                return false;
            }
            match self.ledger.merge_children(&coord) {
                Ok(moved) => debug!(coord = %coord, moved, "consensus.compacted"),
                Err(err) => {
                    warn!(coord = %coord, error = %err, "consensus.compaction_failed");
                    return false;
                }
            }
        }

        self.ledger.seal(&coord);
        self.ledger.unpin(&coord);
        let committed_at = chrono::Utc::now().timestamp_millis();
        let Some(record) = inner.state.record_mut(&coord) else {
            return false;
        };
        record.status = CellStatus::Committed;
        record.committed_at = Some(committed_at);
        if record.settled {
            self.cancel.retire(&coord);
        }
        let digest = record.current.as_ref().map(|p| p.digest);
        if let Some(digest) = digest {
            inner.state.set_verdict(digest, ProofStatus::Committed);
        }
        inner.stats.commits += 1;
        if coord.is_root() {
            info!(coord = %coord, "consensus.final");
        } else {
            info!(coord = %coord, "consensus.committed");
        }
        true
    }

    /// Walk upward from a fresh commit, committing each parent that became
    /// ready. Stops at the first parent that is not.
    fn cascade(&self, inner: &mut ConsensusInner, from: Coordinate) {
        let mut current = from;
        while let Some(parent) = current.parent() {
            if !self.try_commit(inner, parent) {
                break;
            }
            inner.stats.cascades += 1;
            current = parent;
        }
    }

    // ------------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------------

    /// Settle every coordinate that received proofs since the last call.
    ///
    /// The winner per coordinate follows [`select_winner`]; losers are
    /// rejected and peer miners still searching are told to stop. When the
    /// winner carries a different `state_root` than the proof it replaces,
    /// everything below the coordinate is reopened. Waiting parents are then
    /// re-checked deepest first.
    pub fn synchronize(&self) {
        let mut inner = self.inner.lock();
        inner.stats.reconciliations += 1;

        let unsettled = inner.state.unsettled();
        for coord in unsettled {
            let Some(record) = inner.state.record_mut(&coord) else {
                // Reopened by an ancestor earlier in this pass.
                continue;
            };
            let Some(current) = record.current.clone() else {
                continue;
            };
            let contenders = std::mem::take(&mut record.contenders);
            record.settled = true;
            let winner = select_winner(contenders.iter().chain(std::iter::once(&current)))
                .cloned()
                .unwrap_or_else(|| current.clone());
            let replaced = winner.digest != current.digest;
            if replaced {
                record.current = Some(winner.clone());
            }
            let committed = record.status == CellStatus::Committed;

            for loser in contenders
                .iter()
                .chain(std::iter::once(&current))
                .filter(|p| p.digest != winner.digest)
            {
                inner.state.set_verdict(loser.digest, ProofStatus::Rejected);
                inner.stats.rejected += 1;
                info!(coord = %coord, digest = %loser.digest_hex(), nonce = loser.nonce, "consensus.rejected");
            }

            if replaced {
                let verdict = if committed {
                    ProofStatus::Committed
                } else {
                    ProofStatus::Pending
                };
                inner.state.set_verdict(winner.digest, verdict);
                self.ledger.record_digest(coord, winner.state_root);
                if winner.state_root != current.state_root {
                    self.reopen_below(&mut inner, coord);
                }
            }
            // Committed and settled cells never mine again.
            if committed {
                self.cancel.retire(&coord);
            } else {
                self.cancel.supersede(coord);
            }
            debug!(coord = %coord, winner = %winner.digest_hex(), replaced, "consensus.settled");
        }

        let waiting = inner.state.pending_submissions();
        for coord in waiting {
            if self.try_commit(&mut inner, coord) {
                self.cascade(&mut inner, coord);
            }
        }
    }

    /// Return every descendant of `coord` to `Open`.
    fn reopen_below(&self, inner: &mut ConsensusInner, coord: Coordinate) {
        let removed = inner.state.remove_descendants(&coord);
        for (below, record) in &removed {
            let CellRecord {
                current,
                contenders,
                ..
            } = record;
            for proof in current.iter().chain(contenders.iter()) {
                inner.state.set_verdict(proof.digest, ProofStatus::Rejected);
            }
            self.ledger.unpin(below);
            self.ledger.clear_recorded(below);
            self.cancel.retire(below);
        }
        inner.stats.resets += removed.len() as u64;
        if !removed.is_empty() {
            warn!(coord = %coord, reopened = removed.len(), "consensus.descendants_reopened");
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn status(&self, coord: &Coordinate) -> CellStatus {
        self.inner.lock().state.status(coord)
    }

    pub fn proof_status(&self, proof: &Proof) -> Option<ProofStatus> {
        self.inner.lock().state.verdict(&proof.digest)
    }

    pub fn finality(&self, coord: &Coordinate) -> Finality {
        self.inner.lock().state.finality(coord)
    }

    pub fn is_final(&self, coord: &Coordinate) -> bool {
        self.finality(coord) == Finality::Final
    }

    /// The proof currently standing for `coord`, if it is committed.
    pub fn committed_proof(&self, coord: &Coordinate) -> Option<Proof> {
        let inner = self.inner.lock();
        inner
            .state
            .record(coord)
            .filter(|r| r.status == CellStatus::Committed)
            .and_then(|r| r.current.clone())
    }

    /// Whether a miner should still work on `coord`.
    pub fn needs_proof(&self, coord: &Coordinate) -> bool {
        !self.inner.lock().state.has_proof(coord)
    }

    pub fn is_consistent(&self) -> bool {
        self.inner.lock().state.is_consistent()
    }

    pub fn stats(&self) -> ConsensusStats {
        self.inner.lock().stats.clone()
    }
}
