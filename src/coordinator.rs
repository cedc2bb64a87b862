//! Node orchestration
//!
//! The coordinator owns the shared ledger, the consensus engine and a pool of
//! miners. A round walks the fractal top-down: every coordinate that still
//! needs a proof at one level is broadcast to all miner workers, proofs are
//! proposed as they arrive, and the level is reconciled once all of them are
//! in. The next level starts after that. Between rounds a background thread
//! keeps reconciling.

use crate::config::Config;
use crate::consensus::FractalConsensus;
use crate::error::{ChainError, Result};
use crate::geometry::Coordinate;
use crate::ledger::TriangularLedger;
use crate::miner::{CancelRegistry, GeometricMiner, MineOutcome, Proof};
use crate::transaction::Transaction;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Summary of one [`SeirChainCoordinator::run_round`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    /// Deepest level that had any work.
    pub levels: u32,
    pub jobs: usize,
    /// Every proof a miner produced, accepted or not, in arrival order.
    pub found: Vec<Proof>,
    pub accepted: usize,
    pub rejected: usize,
    pub superseded: usize,
    pub pruned: usize,
    pub root_final: bool,
    pub elapsed: Duration,
}

struct WorkerResult {
    miner: u64,
    coord: Coordinate,
    outcome: Result<MineOutcome>,
}

pub struct SeirChainCoordinator {
    config: Config,
    ledger: Arc<TriangularLedger>,
    cancel: Arc<CancelRegistry>,
    consensus: Arc<FractalConsensus>,
    miners: Vec<GeometricMiner>,
    syncing: Arc<AtomicBool>,
    /// Held for the whole of a round; background reconciliation skips a tick
    /// rather than settle a level whose proofs are still arriving.
    round_gate: Arc<Mutex<()>>,
}

impl SeirChainCoordinator {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let ledger = Arc::new(TriangularLedger::from_config(&config.ledger));
        let cancel = Arc::new(CancelRegistry::new());
        let consensus = Arc::new(FractalConsensus::from_config(
            Arc::clone(&ledger),
            Arc::clone(&cancel),
            &config,
        ));
        let miners = (0..config.miner.threads as u64)
            .map(|id| {
                GeometricMiner::from_config(
                    id,
                    Arc::clone(&ledger),
                    Arc::clone(&cancel),
                    &config.miner,
                )
            })
            .collect();

        info!(
            max_level = config.ledger.max_level,
            miners = config.miner.threads,
            base_difficulty = config.miner.base_difficulty,
            "coordinator.init"
        );
        Ok(Self {
            config,
            ledger,
            cancel,
            consensus,
            miners,
            syncing: Arc::new(AtomicBool::new(false)),
            round_gate: Arc::new(Mutex::new(())),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<TriangularLedger> {
        &self.ledger
    }

    pub fn consensus(&self) -> &Arc<FractalConsensus> {
        &self.consensus
    }

    pub fn cancel_registry(&self) -> &Arc<CancelRegistry> {
        &self.cancel
    }

    pub fn miner_count(&self) -> usize {
        self.miners.len()
    }

    /// Nonces tried across all miners so far.
    pub fn total_attempts(&self) -> u64 {
        self.miners.iter().map(GeometricMiner::attempts).sum()
    }

    pub fn submit(&self, tx: Transaction, coord: Coordinate) -> Result<()> {
        self.ledger.add_transaction(tx, coord)
    }

    // ------------------------------------------------------------------------
    // Mining rounds
    // ------------------------------------------------------------------------

    /// Mine and commit everything currently in the ledger, level by level.
    pub fn run_round(&self) -> Result<RoundReport> {
        let _gate = self.round_gate.lock();
        let started = Instant::now();
        let mut report = RoundReport::default();
        let mut frontier = self.level_zero_cells();

        for level in 0..=self.ledger.max_level() {
            if frontier.is_empty() {
                break;
            }
            report.levels = level;
            let jobs: Vec<Coordinate> = frontier
                .iter()
                .copied()
                .filter(|c| self.consensus.needs_proof(c))
                .collect();
            if !jobs.is_empty() {
                debug!(level, jobs = jobs.len(), "coordinator.level");
                self.mine_level(&jobs, &mut report)?;
            }
            frontier = self.next_frontier(&frontier);
        }

        self.consensus.synchronize();
        report.pruned = self.ledger.prune_empty_shards();
        report.root_final = self.consensus.is_final(&Coordinate::root());
        report.elapsed = started.elapsed();
        info!(
            jobs = report.jobs,
            accepted = report.accepted,
            rejected = report.rejected,
            root_final = report.root_final,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "coordinator.round_complete"
        );
        Ok(report)
    }

    /// The root, plus any other level-0 cell holding content.
    fn level_zero_cells(&self) -> Vec<Coordinate> {
        let occupied = self.ledger.occupied_coordinates();
        [Coordinate::root(), Coordinate::new(1, 0, 0), Coordinate::new(0, 1, 0)]
            .into_iter()
            .filter(|cell| {
                cell.is_root() || occupied.iter().any(|c| c.is_within(cell))
            })
            .collect()
    }

    /// Children of every frontier cell with content below it.
    fn next_frontier(&self, frontier: &[Coordinate]) -> Vec<Coordinate> {
        frontier
            .iter()
            .filter(|c| self.ledger.has_descendants(c))
            .filter_map(Coordinate::children)
            .flatten()
            .filter(|c| self.ledger.is_valid_coordinate(c))
            .collect()
    }

    /// Broadcast `jobs` to every miner and propose each proof as it arrives.
    /// The first accepted proof for a coordinate stops its peers without
    /// settling it; the level is reconciled once every worker has drained
    /// its queue, so all proofs found for a coordinate contend.
    fn mine_level(&self, jobs: &[Coordinate], report: &mut RoundReport) -> Result<()> {
        report.jobs += jobs.len();
        let (result_tx, result_rx) = unbounded::<WorkerResult>();

        thread::scope(|scope| {
            let mut job_senders: Vec<Sender<Coordinate>> = Vec::with_capacity(self.miners.len());
            for miner in &self.miners {
                let (job_tx, job_rx) = unbounded::<Coordinate>();
                job_senders.push(job_tx);
                let results = result_tx.clone();
                scope.spawn(move || worker_loop(miner, job_rx, results));
            }
            drop(result_tx);

            for coord in jobs {
                for sender in &job_senders {
                    // A worker only hangs up after its queue is closed.
                    let _ = sender.send(*coord);
                }
            }
            drop(job_senders);

            for result in result_rx.iter() {
                self.handle_result(result, report);
            }
        });
        self.consensus.synchronize();
        Ok(())
    }

    fn handle_result(&self, result: WorkerResult, report: &mut RoundReport) {
        match result.outcome {
            Ok(MineOutcome::Found(proof)) => {
                report.found.push(proof.clone());
                match self.consensus.propose_block(proof) {
                    Ok(()) => {
                        report.accepted += 1;
                        self.cancel.supersede(result.coord);
                    }
                    Err(err) => {
                        report.rejected += 1;
                        warn!(miner = result.miner, coord = %result.coord, error = %err, "coordinator.proposal_rejected");
                    }
                }
            }
            Ok(MineOutcome::Superseded) => report.superseded += 1,
            Err(err) => {
                report.rejected += 1;
                warn!(miner = result.miner, coord = %result.coord, error = %err, "coordinator.mining_failed");
            }
        }
    }

    // ------------------------------------------------------------------------
    // Background reconciliation
    // ------------------------------------------------------------------------

    /// Spawn the thread that calls `synchronize` every `sync_interval`
    /// while no round is running. Only one may run at a time.
    pub fn start(&self) -> Result<CoordinatorHandle> {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ChainError::WorkerError(
                "reconciliation is already running".to_string(),
            ));
        }

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let consensus = Arc::clone(&self.consensus);
        let interval = self.config.consensus.sync_interval;
        let syncing = Arc::clone(&self.syncing);
        let round_gate = Arc::clone(&self.round_gate);

        let spawned = thread::Builder::new()
            .name("seirchain-sync".to_string())
            .spawn(move || {
                info!(interval_ms = interval.as_millis() as u64, "coordinator.sync_started");
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            if let Some(_idle) = round_gate.try_lock() {
                                consensus.synchronize();
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                syncing.store(false, Ordering::SeqCst);
                info!("coordinator.sync_stopped");
            });

        match spawned {
            Ok(join) => Ok(CoordinatorHandle { stop_tx, join }),
            Err(err) => {
                self.syncing.store(false, Ordering::SeqCst);
                Err(ChainError::WorkerError(format!(
                    "failed to spawn reconciliation thread: {}",
                    err
                )))
            }
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }
}

fn worker_loop(miner: &GeometricMiner, jobs: Receiver<Coordinate>, results: Sender<WorkerResult>) {
    for coord in jobs.iter() {
        let outcome = miner.mine(coord);
        let result = WorkerResult {
            miner: miner.id(),
            coord,
            outcome,
        };
        if results.send(result).is_err() {
            break;
        }
    }
}

/// Owner of the background reconciliation thread.
pub struct CoordinatorHandle {
    stop_tx: Sender<()>,
    join: JoinHandle<()>,
}

impl CoordinatorHandle {
    pub fn stop(self) -> Result<()> {
        let _ = self.stop_tx.send(());
        self.join
            .join()
            .map_err(|_| ChainError::WorkerError("reconciliation thread panicked".to_string()))
    }
}
