use crate::messages::Stage;
use paychan_core::{ChannelError, DisputeReason};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("Unsupported protocol version: {got}")]
    UnsupportedVersion { got: u32 },

    #[error("Bankroller deposit {offered} does not match required {required}")]
    DepositMismatch { required: u64, offered: u64 },

    #[error("Counter-party cannot cover the deposit: need {need}, have {available}")]
    CounterpartyUnderfunded { need: u64, available: u64 },

    /// Distinct class: never retried, always routed to the dispute path.
    #[error("Fairness violation: {0}")]
    Fairness(DisputeReason),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid protocol stage: expected {expected}, currently {current}")]
    InvalidStage { expected: Stage, current: Stage },

    #[error("Channel not found on ledger")]
    ChannelNotFound,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Round timed out after {attempts} attempts")]
    Timeout { attempts: u32 },
}

impl ProtocolError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}
