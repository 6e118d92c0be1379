use crate::error::Result;
use crate::types::{hex_array, hex_bytes};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Per-round game parameters agreed before randomness exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameData {
    /// Player-contributed entropy, fresh per round.
    #[serde(with = "hex_array")]
    pub seed: [u8; 32],
    /// Inclusive `[min, max]` bounds, one random number per entry.
    pub random_ranges: Vec<(u64, u64)>,
    /// Opaque game-specific payload. Hashed into the round, never parsed
    /// by the protocol.
    #[serde(with = "hex_bytes")]
    pub custom: Vec<u8>,
}

impl GameData {
    /// Canonical content hash: seed, then each range pair, then the payload.
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.seed);
        for &(min, max) in &self.random_ranges {
            hasher.update(min.to_be_bytes());
            hasher.update(max.to_be_bytes());
        }
        hasher.update(&self.custom);
        hasher.finalize().into()
    }
}

/// Outcome of one game-logic invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayResult {
    /// Signed balance delta from the player's point of view.
    pub profit: i64,
    /// Game-specific result details, passed through to the caller.
    pub data: Option<serde_json::Value>,
}

/// Game payout function.
///
/// Must be pure: both parties call it with identical inputs and compare the
/// profits, so any hidden state or I/O here turns every round into a dispute.
pub trait GameLogic {
    fn play(&self, bets: &[u64], game_data: &GameData, randoms: &[u64]) -> Result<PlayResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_binds_every_field() {
        let base = GameData {
            seed: [7u8; 32],
            random_ranges: vec![(0, 10)],
            custom: vec![1, 2, 3],
        };

        let mut other_seed = base.clone();
        other_seed.seed = [8u8; 32];
        assert_ne!(base.hash(), other_seed.hash());

        let mut other_ranges = base.clone();
        other_ranges.random_ranges = vec![(0, 11)];
        assert_ne!(base.hash(), other_ranges.hash());

        let mut other_custom = base.clone();
        other_custom.custom = vec![1, 2, 4];
        assert_ne!(base.hash(), other_custom.hash());
    }

    #[test]
    fn test_serde_roundtrip() {
        let data = GameData {
            seed: [9u8; 32],
            random_ranges: vec![(1, 6), (1, 6)],
            custom: b"double-roll".to_vec(),
        };
        let json = serde_json::to_string(&data).unwrap();
        let back: GameData = serde_json::from_str(&json).unwrap();
        assert_eq!(data, back);
    }
}
