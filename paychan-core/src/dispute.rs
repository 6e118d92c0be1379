use crate::channel::StateSnapshot;
use crate::game::GameData;
use crate::types::{ChannelId, Signature};
use serde::{Deserialize, Serialize};

/// Why a party abandoned the off-chain exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisputeReason {
    /// The dealer's commitment signature did not verify.
    InvalidCommitment,
    /// Locally derived randoms differ from the dealer's.
    RandomsMismatch,
    /// Locally computed profit differs from the reported one.
    ProfitMismatch,
    /// The counter-party's snapshot could not be confirmed.
    ConfirmationFailed,
    /// The counter-party stopped answering.
    Unresponsive,
}

impl std::fmt::Display for DisputeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DisputeReason::InvalidCommitment => "invalid commitment signature",
            DisputeReason::RandomsMismatch => "randoms mismatch",
            DisputeReason::ProfitMismatch => "profit mismatch",
            DisputeReason::ConfirmationFailed => "state confirmation failed",
            DisputeReason::Unresponsive => "counter-party unresponsive",
        };
        write!(f, "{}", s)
    }
}

/// Inputs of the last round, kept so the aggrieved party can prove what it
/// actually sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundEvidence {
    pub session: u64,
    pub bets: Vec<u64>,
    pub game_data: GameData,
    pub signature: Signature,
}

/// On-chain fallback settlement request: the newest mutually signed snapshot
/// plus whatever round evidence the claimant holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisputeClaim {
    pub channel_id: ChannelId,
    pub reason: DisputeReason,
    pub snapshot: StateSnapshot,
    pub evidence: Option<RoundEvidence>,
}
