//! Geometric proof-of-work
//!
//! A miner binds a puzzle to one coordinate, to the digest its parent
//! recorded and to the children digest it claims, then searches nonces until `SHA-256(puzzle || nonce)` falls
//! under the depth-scaled threshold. Searches poll a per-coordinate
//! cancellation token so a miner stops once a peer's proof has settled.

use crate::config::MinerConfig;
use crate::difficulty::DifficultyCurve;
use crate::digest::{leading_u64, Digest, ZERO_DIGEST};
use crate::error::{ChainError, Result};
use crate::geometry::Coordinate;
use crate::ledger::TriangularLedger;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

const PUZZLE_TAG: &[u8] = b"SEIR-PUZZLE";

/// Each miner id owns a nonce range of this many bits.
pub const NONCE_PARTITION_BITS: u32 = 40;

// ----------------------------------------------------------------------------
// Proof
// ----------------------------------------------------------------------------

/// A miner's claimed solution for one coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub coord: Coordinate,
    pub nonce: u64,
    pub elapsed_time: Duration,
    /// `SHA-256(puzzle || nonce)`; also the proof's identity.
    pub digest: Digest,
    /// Children content digest of `coord` when the puzzle was built. Part
    /// of the puzzle, so it cannot change without redoing the work.
    pub state_root: Digest,
}

impl Proof {
    /// Reconciliation order: smaller digest, then smaller nonce, then the
    /// faster search.
    pub fn rank(&self) -> (Digest, u64, Duration) {
        (self.digest, self.nonce, self.elapsed_time)
    }

    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

/// Deterministic puzzle bytes for `coord` under its parent's recorded digest,
/// committing to `state_root`. Binding the position prevents replaying a
/// solution at another coordinate.
pub fn generate_puzzle(coord: &Coordinate, ancestor_digest: &Digest, state_root: &Digest) -> Vec<u8> {
    let mut puzzle = Vec::with_capacity(PUZZLE_TAG.len() + 20 + 32 + 32);
    puzzle.extend_from_slice(PUZZLE_TAG);
    puzzle.extend_from_slice(&coord.to_bytes());
    puzzle.extend_from_slice(ancestor_digest);
    puzzle.extend_from_slice(state_root);
    puzzle
}

pub fn work_digest(puzzle: &[u8], nonce: u64) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(puzzle);
    hasher.update(nonce.to_le_bytes());
    hasher.finalize().into()
}

/// Recompute the work for `proof` and check it against the curve.
pub fn verify_proof(proof: &Proof, ancestor_digest: &Digest, curve: &DifficultyCurve) -> Result<()> {
    let puzzle = generate_puzzle(&proof.coord, ancestor_digest, &proof.state_root);
    let digest = work_digest(&puzzle, proof.nonce);
    if digest != proof.digest {
        return Err(ChainError::InvalidProofOfWork(format!(
            "digest mismatch at {}: expected {}, got {}",
            proof.coord,
            hex::encode(digest),
            proof.digest_hex()
        )));
    }
    if !curve.meets_target(&digest, proof.coord.level) {
        return Err(ChainError::InvalidProofOfWork(format!(
            "digest {} misses the level {} target",
            proof.digest_hex(),
            proof.coord.level
        )));
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Cancellation
// ----------------------------------------------------------------------------

/// Shared "superseded" signals, one per coordinate.
#[derive(Debug, Default)]
pub struct CancelRegistry {
    signals: Mutex<HashMap<Coordinate, Arc<AtomicBool>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The token for `coord`, created unset on first request.
    pub fn token(&self, coord: Coordinate) -> Arc<AtomicBool> {
        let mut signals = self.signals.lock();
        Arc::clone(
            signals
                .entry(coord)
                .or_insert_with(|| Arc::new(AtomicBool::new(false))),
        )
    }

    /// Tell every search on `coord` to stop.
    pub fn supersede(&self, coord: Coordinate) {
        self.token(coord).store(true, Ordering::SeqCst);
    }

    pub fn is_superseded(&self, coord: &Coordinate) -> bool {
        self.signals
            .lock()
            .get(coord)
            .map(|t| t.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Stop every search holding the current token for `coord` and forget
    /// it. The next token requested for `coord` starts unset.
    pub fn retire(&self, coord: &Coordinate) {
        if let Some(token) = self.signals.lock().remove(coord) {
            token.store(true, Ordering::SeqCst);
        }
    }

    /// Coordinates currently holding a token.
    pub fn len(&self) -> usize {
        self.signals.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.lock().is_empty()
    }
}

// ----------------------------------------------------------------------------
// Miner
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MineOutcome {
    Found(Proof),
    /// A peer already claimed the coordinate; no proof was produced.
    Superseded,
}

#[derive(Clone)]
pub struct GeometricMiner {
    id: u64,
    ledger: Arc<TriangularLedger>,
    cancel: Arc<CancelRegistry>,
    curve: DifficultyCurve,
    check_interval: u64,
    attempts: Arc<AtomicU64>,
}

impl GeometricMiner {
    pub fn new(ledger: Arc<TriangularLedger>, cancel: Arc<CancelRegistry>) -> Self {
        Self::from_config(0, ledger, cancel, &MinerConfig::default())
    }

    pub fn from_config(
        id: u64,
        ledger: Arc<TriangularLedger>,
        cancel: Arc<CancelRegistry>,
        config: &MinerConfig,
    ) -> Self {
        Self {
            id,
            ledger,
            cancel,
            curve: DifficultyCurve::from_config(config),
            check_interval: config.check_interval.max(1),
            attempts: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_curve(mut self, curve: DifficultyCurve) -> Self {
        self.curve = curve;
        self
    }

    pub fn with_check_interval(mut self, check_interval: u64) -> Self {
        self.check_interval = check_interval.max(1);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn curve(&self) -> &DifficultyCurve {
        &self.curve
    }

    /// Total nonces tried by this miner and its clones.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn generate_puzzle(&self, coord: &Coordinate, ancestor_digest: &Digest, state_root: &Digest) -> Vec<u8> {
        generate_puzzle(coord, ancestor_digest, state_root)
    }

    pub fn difficulty_target(&self, level: u32) -> u64 {
        self.curve.difficulty_target(level)
    }

    /// First nonce of this miner's partition.
    pub fn nonce_start(&self) -> u64 {
        (self.id & ((1 << (u64::BITS - NONCE_PARTITION_BITS)) - 1)) << NONCE_PARTITION_BITS
    }

    /// The digest a proof for `coord` must be bound to: the parent's recorded
    /// digest, or zeroes at the root level.
    pub fn ancestor_digest(&self, coord: &Coordinate) -> Digest {
        coord
            .parent()
            .and_then(|p| self.ledger.recorded_digest(&p))
            .unwrap_or(ZERO_DIGEST)
    }

    /// Search for a proof on `coord`. Blocks until a nonce passes or the
    /// coordinate is superseded; the token is polled every `check_interval`
    /// attempts.
    pub fn mine(&self, coord: Coordinate) -> Result<MineOutcome> {
        if !self.ledger.is_valid_coordinate(&coord) {
            return Err(ChainError::InvalidCoordinate(coord));
        }
        let token = self.cancel.token(coord);
        if token.load(Ordering::Acquire) {
            return Ok(MineOutcome::Superseded);
        }

        let ancestor = self.ancestor_digest(&coord);
        let state_root = self.ledger.children_digest(&coord);
        let puzzle = self.generate_puzzle(&coord, &ancestor, &state_root);
        let threshold = self.curve.threshold(coord.level);
        let base = Sha256::new_with_prefix(&puzzle);

        let start = Instant::now();
        let mut nonce = self.nonce_start();
        let mut since_check = 0u64;
        loop {
            let mut hasher = base.clone();
            hasher.update(nonce.to_le_bytes());
            let digest: Digest = hasher.finalize().into();
            since_check += 1;

            if leading_u64(&digest) < threshold {
                self.attempts.fetch_add(since_check, Ordering::Relaxed);
                let proof = Proof {
                    coord,
                    nonce,
                    elapsed_time: start.elapsed(),
                    digest,
                    state_root,
                };
                debug!(
                    miner = self.id,
                    coord = %coord,
                    nonce,
                    elapsed_ms = proof.elapsed_time.as_millis() as u64,
                    "miner.found"
                );
                return Ok(MineOutcome::Found(proof));
            }

            nonce = nonce.wrapping_add(1);
            if since_check >= self.check_interval {
                self.attempts.fetch_add(since_check, Ordering::Relaxed);
                since_check = 0;
                if token.load(Ordering::Acquire) {
                    debug!(miner = self.id, coord = %coord, nonce, "miner.superseded");
                    return Ok(MineOutcome::Superseded);
                }
            }
        }
    }
}
