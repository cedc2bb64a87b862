use crate::digest::{add_into, Digest, ZERO_DIGEST};
use crate::transaction::Transaction;

/// A transaction held by a shard together with its precomputed hash.
#[derive(Debug, Clone)]
pub struct ShardEntry {
    pub transaction: Transaction,
    pub hash: Digest,
}

/// The transactions stored at one coordinate, in append order.
///
/// `sealed` counts the prefix that consensus has committed; everything after
/// it is staged. `digest` is the running sum of every entry's hash.
#[derive(Debug, Clone, Default)]
pub struct Shard {
    entries: Vec<ShardEntry>,
    sealed: usize,
    digest: Digest,
}

impl Shard {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            sealed: 0,
            digest: ZERO_DIGEST,
        }
    }

    pub fn push(&mut self, transaction: Transaction) {
        let hash = transaction.hash();
        self.push_hashed(transaction, hash);
    }

    /// Appends a transaction whose hash the caller already computed.
    pub fn push_hashed(&mut self, transaction: Transaction, hash: Digest) {
        add_into(&mut self.digest, &hash);
        self.entries.push(ShardEntry { transaction, hash });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn digest(&self) -> Digest {
        self.digest
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.entries.iter().map(|e| e.transaction.clone()).collect()
    }

    pub fn committed(&self) -> Vec<Transaction> {
        self.entries[..self.sealed]
            .iter()
            .map(|e| e.transaction.clone())
            .collect()
    }

    pub fn sealed_len(&self) -> usize {
        self.sealed
    }

    /// Marks every current entry as committed.
    pub fn seal(&mut self) {
        self.sealed = self.entries.len();
    }

    /// Empties the shard, handing its entries to the caller.
    pub fn drain(&mut self) -> Vec<ShardEntry> {
        self.sealed = 0;
        self.digest = ZERO_DIGEST;
        std::mem::take(&mut self.entries)
    }

    /// Appends entries taken from another shard, keeping their order.
    pub fn absorb(&mut self, entries: Vec<ShardEntry>) {
        for entry in entries {
            add_into(&mut self.digest, &entry.hash);
            self.entries.push(entry);
        }
    }
}
