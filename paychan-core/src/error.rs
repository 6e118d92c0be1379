use thiserror::Error;

use crate::types::Party;

pub type Result<T> = std::result::Result<T, ChannelError>;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Channel already initialized")]
    AlreadyInitialized,

    #[error("Channel not initialized")]
    NotInitialized,

    #[error("Session mismatch: expected {expected}, got {got}")]
    SessionMismatch { expected: u64, got: u64 },

    #[error("Previous state not confirmed by counter-party")]
    UnconfirmedState,

    #[error("Insufficient balance: need {need}, have {available}")]
    InsufficientBalance { need: u64, available: u64 },

    #[error("{party} balance overdrawn by {shortfall}")]
    Overdraw { party: Party, shortfall: u64 },

    #[error("State hash mismatch")]
    HashMismatch,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid random range: [{min}, {max}]")]
    InvalidRange { min: u64, max: u64 },

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChannelError {
    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto(msg.into())
    }

    pub fn ledger(msg: impl Into<String>) -> Self {
        Self::Ledger(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
