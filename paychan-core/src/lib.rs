//! paychan core - primitives for off-chain wagering payment channels
//!
//! This library provides the channel state machine, the commit-reveal
//! randomness pipeline and the boundary contracts (ledger, game logic) that
//! the round protocol builds on. Two parties lock deposits on a ledger,
//! then exchange signed balance snapshots per round; only open, close and
//! disputes ever reach the ledger.

pub mod channel;
pub mod commitment;
pub mod dispute;
pub mod error;
pub mod game;
pub mod ledger;
pub mod rnd;
pub mod types;

pub use channel::{ChannelStatus, Deposits, PayChannel, StateData, StateSnapshot};
pub use commitment::{CommitmentKey, CommitmentPublic};
pub use dispute::{DisputeClaim, DisputeReason, RoundEvidence};
pub use error::{ChannelError, Result};
pub use game::{GameData, GameLogic, PlayResult};
pub use ledger::{
    ContractCall, InMemoryLedger, Ledger, OnChainChannel, OnChainState, Signer, TxReceipt,
    TxStatus,
};
pub use types::{bets_total, Address, ChannelId, ChannelRules, Party, Signature};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commitment_drives_randoms() {
        // The full fairness pipeline: sign a round hash, derive randoms,
        // verify and re-derive on the other side.
        let key = CommitmentKey::generate_with_size(512).unwrap();
        let round_hash = [7u8; 32];
        let ranges = [(1, 6), (1, 6)];

        let signature = key.sign(&round_hash).unwrap();
        let randoms = rnd::generate(&signature, &ranges).unwrap();

        assert!(key.public().verify(&round_hash, &signature));
        assert_eq!(rnd::generate(&signature, &ranges).unwrap(), randoms);
    }
}
