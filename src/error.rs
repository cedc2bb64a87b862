//! Error types for SeirChain

use crate::geometry::Coordinate;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    /// Coordinate is out of bounds, too deep, or lies in a hole cell.
    #[error("Invalid Sierpinski coordinate: {0}")]
    InvalidCoordinate(Coordinate),

    /// The subdivision check failed when a proof was proposed.
    #[error("Invalid fractal geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid proof of work: {0}")]
    InvalidProofOfWork(String),

    /// The target coordinate was already claimed by a peer miner.
    #[error("Mining superseded at {0}")]
    Superseded(Coordinate),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    #[error("Worker error: {0}")]
    WorkerError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl ChainError {
    /// Whether the caller can recover by correcting the coordinate or remining.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ChainError::InvalidCoordinate(_)
                | ChainError::InvalidGeometry(_)
                | ChainError::InvalidProofOfWork(_)
                | ChainError::Superseded(_)
        )
    }
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::SerializationError(err.to_string())
    }
}

impl From<toml::de::Error> for ChainError {
    fn from(err: toml::de::Error) -> Self {
        ChainError::ConfigError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_kinds() {
        let coord = Coordinate::new(1, 1, 1);
        assert!(ChainError::InvalidCoordinate(coord).is_recoverable());
        assert!(ChainError::InvalidGeometry("mismatch".to_string()).is_recoverable());
        assert!(!ChainError::ConfigError("bad".to_string()).is_recoverable());
    }

    #[test]
    fn test_display_includes_coordinate() {
        let err = ChainError::InvalidCoordinate(Coordinate::new(3, 3, 1));
        assert_eq!(err.to_string(), "Invalid Sierpinski coordinate: (3, 3, 1)");
    }
}
