//! Opaque transaction records
//!
//! The ledger never interprets transaction contents. A transaction is a JSON
//! object (field name -> value) handed over by the contract engine or the
//! wallet; the only thing the core derives from it is a canonical hash.

use crate::digest::{hash_data, Digest};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transaction {
    fields: Map<String, Value>,
}

impl Transaction {
    pub fn new() -> Self {
        Self { fields: Map::new() }
    }

    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Builder-style field insertion.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.fields
    }

    /// Canonical JSON text. Object keys are sorted, so equal records always
    /// produce identical bytes.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        Value::Object(self.fields.clone()).to_string().into_bytes()
    }

    /// Calculate the hash of this transaction
    pub fn hash(&self) -> Digest {
        hash_data(&self.canonical_bytes())
    }

    pub fn hash_str(&self) -> String {
        hex::encode(self.hash())
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Map<String, Value>> for Transaction {
    fn from(fields: Map<String, Value>) -> Self {
        Self::from_map(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_ignores_insertion_order() {
        let a = Transaction::new().with_field("to", "bob").with_field("amount", 5);
        let b = Transaction::new().with_field("amount", 5).with_field("to", "bob");
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_hash_changes_with_content() {
        let a = Transaction::new().with_field("amount", 5);
        let b = Transaction::new().with_field("amount", 6);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_serializes_as_plain_object() {
        let tx = Transaction::new().with_field("memo", json!({"k": [1, 2]}));
        let text = serde_json::to_string(&tx).unwrap();
        assert_eq!(text, r#"{"memo":{"k":[1,2]}}"#);
        let back: Transaction = serde_json::from_str(&text).unwrap();
        assert_eq!(back, tx);
    }
}
