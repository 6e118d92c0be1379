//! Typed protocol messages and their canonical hashes.
//!
//! Every operation has its own tagged struct; nothing dynamically typed
//! crosses the wire boundary. The hash builders here define exactly which
//! bytes a signature covers, so both sides must agree on them to the byte.

use paychan_core::types::hex_bytes;
use paychan_core::{
    Address, ChannelId, CommitmentPublic, GameData, OnChainState, PlayResult, Signature,
    StateSnapshot,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

pub const PROTOCOL_VERSION: u32 = 1;

/// Lifecycle of one protocol instance, player or dealer side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Idle,
    OpenRequested,
    Open,
    RoundInFlight,
    ClosePending,
    Closed,
    Disputed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Idle => "idle",
            Stage::OpenRequested => "open-requested",
            Stage::Open => "open",
            Stage::RoundInFlight => "round-in-flight",
            Stage::ClosePending => "close-pending",
            Stage::Closed => "closed",
            Stage::Disputed => "disputed",
        };
        write!(f, "{}", s)
    }
}

/// A response plus the sender's signature over its canonical hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedResponse<T> {
    pub response: T,
    pub signature: Signature,
}

/// Player's request to open a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRequest {
    pub version: u32,
    pub channel_id: ChannelId,
    pub player_address: Address,
    pub player_deposit: u64,
    /// Opaque game announcement, bound into the signature but not parsed.
    #[serde(with = "hex_bytes")]
    pub game_payload: Vec<u8>,
}

impl OpenRequest {
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.version.to_be_bytes());
        hasher.update(self.channel_id.as_bytes());
        hasher.update(self.player_address.as_bytes());
        hasher.update(self.player_deposit.to_be_bytes());
        hasher.update(&self.game_payload);
        hasher.finalize().into()
    }
}

/// Dealer's open-channel terms: both deposits, the opening block and the
/// commitment public key, all bound by the dealer's signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenReply {
    pub channel_id: ChannelId,
    pub player_address: Address,
    pub bankroller_address: Address,
    pub player_deposit: u64,
    pub bankroller_deposit: u64,
    pub opening_block: u64,
    pub commitment: CommitmentPublic,
}

impl OpenReply {
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.channel_id.as_bytes());
        hasher.update(self.player_address.as_bytes());
        hasher.update(self.bankroller_address.as_bytes());
        hasher.update(self.player_deposit.to_be_bytes());
        hasher.update(self.bankroller_deposit.to_be_bytes());
        hasher.update(self.opening_block.to_be_bytes());
        hasher.update(&self.commitment.n);
        hasher.update(&self.commitment.e);
        hasher.finalize().into()
    }
}

/// On-chain channel view returned by the dealer's check operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelCheck {
    pub channel_id: ChannelId,
    pub state: OnChainState,
    pub player_balance: u64,
    pub bankroller_balance: u64,
}

/// One wager: bets, game parameters and the player's signature over the
/// round hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayRequest {
    pub version: u32,
    pub channel_id: ChannelId,
    pub session: u64,
    pub bets: Vec<u64>,
    pub game_data: GameData,
    pub signature: Signature,
}

impl PlayRequest {
    pub fn round_hash(&self) -> [u8; 32] {
        round_hash(&self.channel_id, self.session, &self.bets, &self.game_data)
    }
}

/// The hash a round commitment signs: channel, session, bets and game data.
///
/// This is what makes the dealer's randomness signature specific to one
/// round of one channel and unforgeable across replays.
pub fn round_hash(
    channel_id: &ChannelId,
    session: u64,
    bets: &[u64],
    game_data: &GameData,
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(channel_id.as_bytes());
    hasher.update(session.to_be_bytes());
    for bet in bets {
        hasher.update(bet.to_be_bytes());
    }
    hasher.update(game_data.hash());
    hasher.finalize().into()
}

/// Dealer's round result: game outcome, derived randoms, the commitment
/// signature they came from, and the dealer-signed state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayReply {
    pub result: PlayResult,
    pub randoms: Vec<u64>,
    #[serde(with = "hex_bytes")]
    pub commitment_signature: Vec<u8>,
    pub snapshot: StateSnapshot,
}

/// Bankroller's consent to a cooperative close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseConsent {
    pub consent_signature: Signature,
    pub bankroller_address: Address,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_game_data() -> GameData {
        GameData {
            seed: [1u8; 32],
            random_ranges: vec![(1, 6)],
            custom: Vec::new(),
        }
    }

    #[test]
    fn test_round_hash_binds_session_and_bets() {
        let id = ChannelId([2u8; 32]);
        let data = sample_game_data();

        let base = round_hash(&id, 3, &[10], &data);
        assert_ne!(base, round_hash(&id, 4, &[10], &data));
        assert_ne!(base, round_hash(&id, 3, &[11], &data));
        assert_ne!(base, round_hash(&id, 3, &[10, 10], &data));
        assert_ne!(base, round_hash(&ChannelId([3u8; 32]), 3, &[10], &data));
    }

    #[test]
    fn test_open_reply_hash_binds_commitment_key() {
        let reply = OpenReply {
            channel_id: ChannelId([2u8; 32]),
            player_address: Address([1u8; 20]),
            bankroller_address: Address([2u8; 20]),
            player_deposit: 100,
            bankroller_deposit: 200,
            opening_block: 5,
            commitment: CommitmentPublic {
                n: vec![1, 2, 3],
                e: vec![1, 0, 1],
            },
        };

        let mut tampered = reply.clone();
        tampered.commitment.n = vec![1, 2, 4];
        assert_ne!(reply.hash(), tampered.hash());

        let mut low_deposit = reply.clone();
        low_deposit.bankroller_deposit = 199;
        assert_ne!(reply.hash(), low_deposit.hash());
    }

    #[test]
    fn test_play_request_serde_roundtrip() {
        let request = PlayRequest {
            version: PROTOCOL_VERSION,
            channel_id: ChannelId([9u8; 32]),
            session: 1,
            bets: vec![5, 5],
            game_data: sample_game_data(),
            signature: Signature([7u8; 65]),
        };
        let json = serde_json::to_string(&request).unwrap();
        let back: PlayRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(request.round_hash(), back.round_hash());
    }
}
