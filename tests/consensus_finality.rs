//! Integration tests for proof reconciliation and the commit cascade

use seirchain::config::MinerConfig;
use seirchain::consensus::FractalConsensus;
use seirchain::difficulty::DifficultyCurve;
use seirchain::error::ChainError;
use seirchain::fractal_state::{CellStatus, Finality, ProofStatus};
use seirchain::geometry::Coordinate;
use seirchain::ledger::TriangularLedger;
use seirchain::miner::{CancelRegistry, GeometricMiner, MineOutcome, Proof};
use seirchain::transaction::Transaction;
use std::sync::Arc;

type TestResult = Result<(), Box<dyn std::error::Error>>;

const CURVE: DifficultyCurve = DifficultyCurve {
    base_difficulty: 2,
    depth_multiplier: 1,
};

struct Harness {
    ledger: Arc<TriangularLedger>,
    cancel: Arc<CancelRegistry>,
    consensus: FractalConsensus,
}

impl Harness {
    fn new(max_level: u32) -> Self {
        let ledger = Arc::new(TriangularLedger::new(max_level));
        let cancel = Arc::new(CancelRegistry::new());
        let consensus = FractalConsensus::new(Arc::clone(&ledger), Arc::clone(&cancel), CURVE);
        Self {
            ledger,
            cancel,
            consensus,
        }
    }

    fn miner(&self, id: u64) -> GeometricMiner {
        // Private cancel registry: these miners must keep working on
        // coordinates consensus has already settled.
        GeometricMiner::from_config(
            id,
            Arc::clone(&self.ledger),
            Arc::new(CancelRegistry::new()),
            &MinerConfig::default(),
        )
        .with_curve(CURVE)
        .with_check_interval(64)
    }

    fn mine(&self, id: u64, coord: Coordinate) -> Result<Proof, Box<dyn std::error::Error>> {
        match self.miner(id).mine(coord)? {
            MineOutcome::Found(proof) => Ok(proof),
            MineOutcome::Superseded => Err(format!("{} superseded", coord).into()),
        }
    }

    /// A proof for `coord` whose digest is smaller than `than`'s.
    fn mine_smaller(&self, coord: Coordinate, than: &Proof) -> Result<Proof, Box<dyn std::error::Error>> {
        for id in 1..256 {
            let proof = self.mine(id, coord)?;
            if proof.digest < than.digest {
                return Ok(proof);
            }
        }
        Err("no smaller proof found".into())
    }

    fn add(&self, tag: &str, coord: Coordinate) -> TestResult {
        self.ledger
            .add_transaction(Transaction::new().with_field("tag", tag), coord)?;
        Ok(())
    }
}

#[test]
fn test_reconciliation_is_order_independent() -> TestResult {
    let miners = Harness::new(2);
    let first = miners.mine(0, Coordinate::root())?;
    let better = miners.mine_smaller(Coordinate::root(), &first)?;

    for order in [[&first, &better], [&better, &first]] {
        let h = Harness::new(2);
        for proof in order {
            h.consensus.propose_block(proof.clone())?;
        }
        h.consensus.synchronize();

        assert_eq!(h.consensus.committed_proof(&Coordinate::root()), Some(better.clone()));
        assert_eq!(h.consensus.proof_status(&better), Some(ProofStatus::Committed));
        assert_eq!(h.consensus.proof_status(&first), Some(ProofStatus::Rejected));
        assert!(h.cancel.is_empty());
    }
    Ok(())
}

#[test]
fn test_forged_state_root_is_rejected() -> TestResult {
    let h = Harness::new(2);
    let root = Coordinate::root();
    let children = root.children().ok_or("children")?;
    h.add("honest", children[1])?;

    let mut forged = h.mine(0, root)?;
    forged.state_root = [0x42; 32];
    let err = h.consensus.propose_block(forged).unwrap_err();
    assert!(matches!(err, ChainError::InvalidProofOfWork(_)));
    assert_eq!(h.ledger.recorded_digest(&root), None);

    h.consensus.propose_block(h.mine(1, root)?)?;
    assert_eq!(h.ledger.recorded_digest(&root), Some(h.ledger.children_digest(&root)));
    for child in children {
        h.consensus.propose_block(h.mine(0, child)?)?;
    }
    assert!(h.consensus.is_final(&root));
    Ok(())
}

#[test]
fn test_committed_cells_release_cancel_tokens() -> TestResult {
    let h = Harness::new(2);
    let root = Coordinate::root();
    let children = root.children().ok_or("children")?;
    h.add("x", children[0])?;

    h.consensus.propose_block(h.mine(0, root)?)?;
    h.consensus.synchronize();
    // Settled but waiting on its children.
    assert!(h.cancel.is_superseded(&root));

    for child in children {
        h.consensus.propose_block(h.mine(0, child)?)?;
    }
    h.consensus.synchronize();
    assert!(h.consensus.is_final(&root));
    assert!(h.cancel.is_empty());
    Ok(())
}

#[test]
fn test_proposals_after_settlement_are_noops() -> TestResult {
    let h = Harness::new(2);
    let first = h.mine(0, Coordinate::root())?;
    h.consensus.propose_block(first.clone())?;
    h.consensus.synchronize();

    let late = h.mine_smaller(Coordinate::root(), &first)?;
    h.consensus.propose_block(late.clone())?;
    h.consensus.synchronize();
    assert_eq!(h.consensus.committed_proof(&Coordinate::root()), Some(first));
    assert_eq!(h.consensus.proof_status(&late), None);
    Ok(())
}

#[test]
fn test_cascade_reaches_root_and_compacts() -> TestResult {
    let h = Harness::new(3);
    let root = Coordinate::root();
    let mid = Coordinate::new(0, 1, 1);
    let leaf = Coordinate::new(0, 2, 2);
    h.add("root-level", Coordinate::new(1, 0, 1))?;
    h.add("deep", leaf)?;

    h.consensus.propose_block(h.mine(0, root)?)?;
    for child in root.children().ok_or("children")? {
        h.consensus.propose_block(h.mine(0, child)?)?;
    }
    assert_eq!(h.consensus.status(&mid), CellStatus::ProofSubmitted);
    assert_eq!(h.consensus.finality(&Coordinate::new(1, 0, 1)), Finality::Provisional);

    for child in mid.children().ok_or("children")? {
        h.consensus.propose_block(h.mine(0, child)?)?;
    }
    h.consensus.synchronize();

    assert!(h.consensus.is_final(&root));
    assert!(h.consensus.is_final(&leaf));
    assert_eq!(h.ledger.committed_transactions(&root).len(), 2);
    assert!(!h.ledger.has_descendants(&root));
    assert!(h.consensus.is_consistent());
    Ok(())
}

#[test]
fn test_tampered_child_keeps_parent_unfinal() -> TestResult {
    let h = Harness::new(2);
    let root = Coordinate::root();
    let children = root.children().ok_or("children")?;
    h.add("first", children[0])?;

    h.consensus.propose_block(h.mine(0, root)?)?;
    h.consensus.propose_block(h.mine(0, children[0])?)?;
    h.add("tamper", children[1])?;

    let err = h.consensus.propose_block(h.mine(0, children[1])?).unwrap_err();
    assert!(matches!(err, ChainError::InvalidGeometry(_)));
    let err = h.consensus.propose_block(h.mine(0, children[2])?).unwrap_err();
    assert!(matches!(err, ChainError::InvalidGeometry(_)));

    h.consensus.synchronize();
    assert_eq!(h.consensus.status(&root), CellStatus::ProofSubmitted);
    assert_eq!(h.consensus.finality(&root), Finality::Open);
    assert_eq!(h.consensus.finality(&children[0]), Finality::Provisional);
    assert!(h.ledger.is_pinned(&root));
    assert!(h.cancel.is_superseded(&root));
    Ok(())
}

#[test]
fn test_rejected_proof_stays_rejected() -> TestResult {
    let h = Harness::new(2);
    let orphan = h.mine(0, Coordinate::new(0, 1, 1))?;
    assert!(h.consensus.propose_block(orphan.clone()).is_err());
    let err = h.consensus.propose_block(orphan).unwrap_err();
    assert!(err.is_recoverable());
    assert_eq!(h.consensus.stats().rejected, 1);
    Ok(())
}

#[test]
fn test_replacing_state_root_reopens_descendants() -> TestResult {
    let h = Harness::new(2);
    let root = Coordinate::root();
    let children = root.children().ok_or("children")?;
    h.add("a", children[0])?;

    let original = h.mine(0, root)?;
    h.consensus.propose_block(original.clone())?;
    let committed_child = h.mine(0, children[0])?;
    h.consensus.propose_block(committed_child.clone())?;
    assert_eq!(h.consensus.status(&children[0]), CellStatus::Committed);

    // New content changes the children digest a later root proof commits to.
    h.add("b", children[2])?;
    let replacement = h.mine_smaller(root, &original)?;
    assert_ne!(replacement.state_root, original.state_root);
    h.consensus.propose_block(replacement.clone())?;
    h.consensus.synchronize();

    assert_eq!(h.ledger.recorded_digest(&root), Some(replacement.state_root));
    assert_eq!(h.consensus.status(&children[0]), CellStatus::Open);
    assert_eq!(h.consensus.proof_status(&committed_child), Some(ProofStatus::Rejected));
    assert!(h.consensus.stats().resets >= 1);

    for child in children {
        h.consensus.propose_block(h.mine(0, child)?)?;
    }
    assert!(h.consensus.is_final(&root));
    assert_eq!(h.ledger.committed_transactions(&root).len(), 2);
    Ok(())
}
