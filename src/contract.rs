//! Contract engine boundary
//!
//! Deployments and calls are recorded as ordinary transactions in the shard
//! of the contract's coordinate. Nothing here executes code.

use crate::error::Result;
use crate::geometry::Coordinate;
use crate::ledger::TriangularLedger;
use crate::transaction::Transaction;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub const DEPLOY_TYPE: &str = "deploy";
pub const CALL_TYPE: &str = "call";

pub struct FractalContractEngine {
    ledger: Arc<TriangularLedger>,
}

impl FractalContractEngine {
    pub fn new(ledger: Arc<TriangularLedger>) -> Self {
        Self { ledger }
    }

    /// Record `bytecode` (hex encoded) at `coord`.
    pub fn deploy(&self, bytecode: &[u8], coord: Coordinate) -> Result<()> {
        let tx = Transaction::new()
            .with_field("type", DEPLOY_TYPE)
            .with_field("code", hex::encode(bytecode));
        self.ledger.add_transaction(tx, coord)?;
        debug!(coord = %coord, bytes = bytecode.len(), "contract.deploy");
        Ok(())
    }

    pub fn call(&self, coord: Coordinate, method: &str, args: Vec<Value>) -> Result<()> {
        let tx = Transaction::new()
            .with_field("type", CALL_TYPE)
            .with_field("method", method)
            .with_field("args", Value::Array(args));
        self.ledger.add_transaction(tx, coord)?;
        debug!(coord = %coord, method, "contract.call");
        Ok(())
    }

    /// Bytecode deployed at `coord`, oldest first. Records whose code is not
    /// valid hex are skipped.
    pub fn deployments(&self, coord: &Coordinate) -> Vec<Vec<u8>> {
        self.ledger
            .get_transactions(coord)
            .iter()
            .filter(|tx| tx.get("type").and_then(Value::as_str) == Some(DEPLOY_TYPE))
            .filter_map(|tx| tx.get("code").and_then(Value::as_str).map(hex::decode))
            .filter_map(|decoded| decoded.ok())
            .collect()
    }

    /// `(method, args)` of every call recorded at `coord`.
    pub fn calls(&self, coord: &Coordinate) -> Vec<(String, Vec<Value>)> {
        self.ledger
            .get_transactions(coord)
            .iter()
            .filter(|tx| tx.get("type").and_then(Value::as_str) == Some(CALL_TYPE))
            .filter_map(|tx| {
                let method = tx.get("method")?.as_str()?.to_string();
                let args = tx.get("args")?.as_array()?.clone();
                Some((method, args))
            })
            .collect()
    }
}
