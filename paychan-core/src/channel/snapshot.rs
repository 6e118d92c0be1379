use crate::error::{ChannelError, Result};
use crate::ledger::recover;
use crate::types::{Address, ChannelId, Signature};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// The fields both parties sign each round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateData {
    pub id: ChannelId,
    pub player_balance: u64,
    pub bankroller_balance: u64,
    pub total_bet: u64,
    pub session: u64,
}

impl StateData {
    /// Canonical big-endian encoding, the preimage of every state hash.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(self.id.as_bytes());
        out.extend_from_slice(&self.player_balance.to_be_bytes());
        out.extend_from_slice(&self.bankroller_balance.to_be_bytes());
        out.extend_from_slice(&self.total_bet.to_be_bytes());
        out.extend_from_slice(&self.session.to_be_bytes());
        out
    }

    pub fn hash(&self) -> [u8; 32] {
        Sha256::digest(self.encode()).into()
    }

    /// Hash a close-consent proposal: the state plus a terminal flag byte,
    /// so a close signature can never be replayed as a state signature.
    pub fn close_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.encode());
        hasher.update([1u8]);
        hasher.finalize().into()
    }
}

/// A state snapshot plus the signatures collected over its hash.
///
/// The hash is always recomputed from `data`; it is never carried as a
/// separate field that could drift from the content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub data: StateData,
    pub signs: BTreeMap<Address, Signature>,
}

impl StateSnapshot {
    pub fn new(data: StateData) -> Self {
        Self {
            data,
            signs: BTreeMap::new(),
        }
    }

    pub fn hash(&self) -> [u8; 32] {
        self.data.hash()
    }

    pub fn add_signature(&mut self, address: Address, signature: Signature) {
        self.signs.insert(address, signature);
    }

    /// True when a stored signature recovers to `address`.
    pub fn is_signed_by(&self, address: &Address) -> bool {
        let Some(signature) = self.signs.get(address) else {
            return false;
        };
        matches!(recover(&self.hash(), signature), Ok(signer) if signer == *address)
    }

    /// Fetch and verify the signature stored for `address`.
    pub fn signature_of(&self, address: &Address) -> Result<Signature> {
        let signature = self
            .signs
            .get(address)
            .ok_or(ChannelError::InvalidSignature)?;
        if recover(&self.hash(), signature)? != *address {
            return Err(ChannelError::InvalidSignature);
        }
        Ok(*signature)
    }
}
