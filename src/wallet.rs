//! Wallet and signing for SeirChain transactions
//!
//! The ledger treats signatures as opaque payload. Everything cryptographic
//! lives here: key generation, signing, and a verifier callers run before
//! handing a transaction to the ledger.

use crate::digest::hash_data;
use crate::error::{ChainError, Result};
use crate::geometry::Coordinate;
use crate::transaction::Transaction;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secp256k1::{ecdsa::Signature, All, Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Field holding the signature list of a crafted transaction.
pub const SIGNATURES_FIELD: &str = "signatures";

fn crypto_err(what: &str, err: impl std::fmt::Display) -> ChainError {
    ChainError::CryptoError(format!("{}: {}", what, err))
}

/// One element of a transaction's signature list, hex-encoded as it sits in
/// the record: a compressed public key and a compact ECDSA signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEntry {
    pub public_key: String,
    pub signature: String,
}

impl SignatureEntry {
    /// Check this entry against an already hashed message.
    pub fn verify(&self, message: &Message) -> Result<()> {
        let key_bytes = hex::decode(&self.public_key).map_err(|e| crypto_err("public key hex", e))?;
        let sig_bytes = hex::decode(&self.signature).map_err(|e| crypto_err("signature hex", e))?;
        let public_key = PublicKey::from_slice(&key_bytes).map_err(|e| crypto_err("public key", e))?;
        let signature = Signature::from_compact(&sig_bytes).map_err(|e| crypto_err("signature", e))?;
        SECP256K1_CONTEXT
            .verify_ecdsa(message, &signature, &public_key)
            .map_err(|_| {
                ChainError::CryptoError(format!(
                    "signature by {} does not match the message",
                    self.public_key
                ))
            })
    }
}

/// A secp256k1 key held by a [`Wallet`].
#[derive(Debug, Clone)]
pub struct SigningKey {
    secret: SecretKey,
    public: PublicKey,
}

impl SigningKey {
    pub fn generate() -> Self {
        Self::from_secret(SecretKey::new(&mut OsRng))
    }

    fn from_secret(secret: SecretKey) -> Self {
        let public = PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret);
        Self { secret, public }
    }

    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        SecretKey::from_slice(bytes)
            .map(Self::from_secret)
            .map_err(|e| crypto_err("secret key", e))
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Compressed public key as lowercase hex.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public.serialize())
    }

    /// Sign an already hashed message.
    pub fn sign_message(&self, message: &Message) -> SignatureEntry {
        let signature = SECP256K1_CONTEXT.sign_ecdsa(message, &self.secret);
        SignatureEntry {
            public_key: self.public_key_hex(),
            signature: hex::encode(signature.serialize_compact()),
        }
    }

    /// Sign arbitrary bytes; they are hashed with the ledger's hash first.
    pub fn sign(&self, bytes: &[u8]) -> SignatureEntry {
        self.sign_message(&Message::from_digest(hash_data(bytes)))
    }

    pub fn sign_transaction(&self, tx: &Transaction) -> SignatureEntry {
        self.sign_message(&signing_message(tx))
    }
}

/// Verify `signature` (compact, hex) by `public_key` (compressed, hex) over
/// `bytes`, the counterpart of [`SigningKey::sign`].
pub fn verify_signature(public_key: &str, bytes: &[u8], signature: &str) -> Result<()> {
    let entry = SignatureEntry {
        public_key: public_key.to_string(),
        signature: signature.to_string(),
    };
    entry.verify(&Message::from_digest(hash_data(bytes)))
}

/// Bytes covered by signatures: the canonical form of every field except
/// the signature list itself.
pub fn signable_bytes(tx: &Transaction) -> Vec<u8> {
    let mut fields = tx.fields().clone();
    fields.remove(SIGNATURES_FIELD);
    Transaction::from_map(fields).canonical_bytes()
}

/// What every signature on `tx` signs.
pub fn signing_message(tx: &Transaction) -> Message {
    Message::from_digest(hash_data(&signable_bytes(tx)))
}

/// The signature list of `tx`; empty when it carries none.
pub fn signature_entries(tx: &Transaction) -> Result<Vec<SignatureEntry>> {
    match tx.get(SIGNATURES_FIELD) {
        None => Ok(Vec::new()),
        Some(list @ Value::Array(_)) => serde_json::from_value(list.clone())
            .map_err(|e| crypto_err("malformed signature entry", e)),
        Some(_) => Err(ChainError::CryptoError(
            "signatures must be a list".to_string(),
        )),
    }
}

/// Check every entry of `tx`'s signature list. Returns how many verified;
/// an unsigned transaction verifies zero signatures without error.
pub fn verify_transaction(tx: &Transaction) -> Result<usize> {
    let entries = signature_entries(tx)?;
    let message = signing_message(tx);
    for entry in &entries {
        entry.verify(&message)?;
    }
    Ok(entries.len())
}

/// A set of signing keys that can jointly authorise a transaction.
#[derive(Debug, Default)]
pub struct Wallet {
    keys: Vec<SigningKey>,
}

impl Wallet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a key, returning its index.
    pub fn generate_key(&mut self) -> usize {
        self.keys.push(SigningKey::generate());
        self.keys.len() - 1
    }

    pub fn key(&self, index: usize) -> Option<&SigningKey> {
        self.keys.get(index)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn sign(&self, key_index: usize, message: &[u8]) -> Result<SignatureEntry> {
        Ok(self.signing_key(key_index)?.sign(message))
    }

    /// An unsigned transfer destined for the shard at `coord`.
    pub fn craft_tx(&self, to: &str, amount: u64, coord: Coordinate) -> Transaction {
        Transaction::new()
            .with_field("to", to)
            .with_field("amount", amount)
            .with_field("coord", json!([coord.x, coord.y, coord.level]))
            .with_field(SIGNATURES_FIELD, Value::Array(Vec::new()))
    }

    /// Sign `tx` with key `key_index` and append `{public_key, signature}`.
    /// Earlier signatures stay valid since the list is not signed.
    pub fn add_signature(&self, tx: &mut Transaction, key_index: usize) -> Result<()> {
        let entry = serde_json::to_value(self.signing_key(key_index)?.sign_transaction(tx))?;

        let slot = tx
            .fields_mut()
            .entry(SIGNATURES_FIELD)
            .or_insert_with(|| Value::Array(Vec::new()));
        match slot {
            Value::Array(entries) => {
                entries.push(entry);
                Ok(())
            }
            _ => Err(ChainError::CryptoError(
                "signatures must be a list".to_string(),
            )),
        }
    }

    fn signing_key(&self, index: usize) -> Result<&SigningKey> {
        self.keys.get(index).ok_or_else(|| {
            ChainError::CryptoError(format!(
                "no key at index {} (wallet holds {})",
                index,
                self.keys.len()
            ))
        })
    }
}
