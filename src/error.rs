//! Error types for VanillaChain

use crate::amount::Amount;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum NodeError {
    /// Malformed framing or header; the connection is torn down.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A block failed validation; surfaced as a rejection, connection stays open.
    #[error("{0}")]
    Validation(String),

    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("Insufficient balance. Required: {required}, Available: {available}")]
    InsufficientFunds { required: Amount, available: Amount },

    #[error("Username already exists")]
    UsernameTaken(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// The persistence layer is unreachable or refused a commit. Mutating
    /// commands fail closed when this surfaces.
    #[error("Store error: {0}")]
    Store(String),

    #[error("Hash self-test failed: {0}")]
    Crypto(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        NodeError::Io(err.to_string())
    }
}

impl From<rusqlite::Error> for NodeError {
    fn from(err: rusqlite::Error) -> Self {
        NodeError::Store(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, NodeError>;
