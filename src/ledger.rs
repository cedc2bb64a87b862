// Thin re-export module: the ledger is split into shard storage, subtree
// aggregates, the thread-safe store and the geometric validation rules.

pub mod index;
pub mod shard;
pub mod store;
pub mod validation;

pub use shard::*;
pub use store::*;
