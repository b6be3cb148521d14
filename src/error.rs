//! Error types for the ledger core

use std::time::Duration;
use thiserror::Error;

/// Which tier of the ledger lock an operation was waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTier {
    Read,
    Update,
    Write,
}

impl std::fmt::Display for LockTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockTier::Read => write!(f, "read"),
            LockTier::Update => write!(f, "update"),
            LockTier::Write => write!(f, "write"),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("Missing block: {0}")]
    MissingBlock(String),
    #[error("Missing transaction: {0}")]
    MissingTransaction(String),
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
    #[error("Timed out after {waited:?} waiting for the {tier} lock")]
    LockTimeout { tier: LockTier, waited: Duration },
    #[error("Storage failure: {0}")]
    StorageFailure(String),
    #[error("Invalid reference block at height {height}: expected {expected}, got {actual}")]
    InvalidReference {
        height: u64,
        expected: String,
        actual: String,
    },
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Cryptographic error: {0}")]
    CryptoError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("IO error: {0}")]
    IoError(String),
}

/// Coarse classification used by API layers to pick a response class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Lookup miss; usually an empty or 404-style answer.
    NotFound,
    /// A consensus-layer bug; the locked section was aborted.
    InvariantViolation,
    /// Bounded lock wait expired; caller may retry.
    LockTimeout,
    /// Underlying storage failed; never retried by the core.
    StorageFailure,
    /// The caller supplied something malformed or not anchored to this chain.
    InvalidInput,
}

impl ChainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChainError::MissingBlock(_) | ChainError::MissingTransaction(_) => ErrorKind::NotFound,
            ChainError::InvariantViolation(_) => ErrorKind::InvariantViolation,
            ChainError::LockTimeout { .. } => ErrorKind::LockTimeout,
            ChainError::StorageFailure(_) | ChainError::IoError(_) => ErrorKind::StorageFailure,
            ChainError::InvalidReference { .. }
            | ChainError::InvalidTransaction(_)
            | ChainError::Serialization(_)
            | ChainError::CryptoError(_)
            | ChainError::ConfigError(_) => ErrorKind::InvalidInput,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<rusqlite::Error> for ChainError {
    fn from(err: rusqlite::Error) -> Self {
        ChainError::StorageFailure(err.to_string())
    }
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for ChainError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        ChainError::Serialization(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
