//! SeirChain - a fractal ledger sharded across a Sierpinski gasket
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Geometry & Data
//! - [`geometry`] - Sierpinski coordinates, parents, children and ancestry
//! - [`digest`] - SHA-256 digests and order-independent aggregation
//! - [`transaction`] - Opaque transaction records
//!
//! ## Ledger
//! - [`ledger`] - Thread-safe triangular shard store and subdivision checks
//!
//! ## Mining & Consensus
//! - [`difficulty`] - Depth-scaled difficulty curve
//! - [`miner`] - Geometric proof-of-work with cooperative cancellation
//! - [`fractal_state`] - Per-coordinate consensus records
//! - [`consensus`] - Proposal validation, reconciliation and commit cascade
//!
//! ## Boundaries
//! - [`contract`] - Contract deployments recorded as transactions
//! - [`wallet`] - secp256k1 keys and transaction signatures
//! - [`coordinator`] - Miner workers and background reconciliation
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Geometry & Data
// ============================================================================
pub mod digest;
pub mod geometry;
pub mod transaction;

// ============================================================================
// Ledger
// ============================================================================
pub mod ledger;

// ============================================================================
// Mining & Consensus
// ============================================================================
pub mod consensus;
pub mod difficulty;
pub mod fractal_state;
pub mod miner;

// ============================================================================
// Boundaries
// ============================================================================
pub mod contract;
pub mod coordinator;
pub mod wallet;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;

pub use consensus::FractalConsensus;
pub use coordinator::{RoundReport, SeirChainCoordinator};
pub use error::{ChainError, Result};
pub use geometry::Coordinate;
pub use ledger::TriangularLedger;
pub use miner::{GeometricMiner, MineOutcome, Proof};
pub use transaction::Transaction;
