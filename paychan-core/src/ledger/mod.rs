pub mod memory;

pub use memory::InMemoryLedger;

use crate::channel::StateData;
use crate::commitment::CommitmentPublic;
use crate::dispute::DisputeClaim;
use crate::error::{ChannelError, Result};
use crate::types::{Address, ChannelId, Signature};
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A party's ledger identity key.
///
/// The agreed scheme is hash-then-sign: recoverable ECDSA over the Sha256 of
/// the message, with the identity being the trailing 20 bytes of the Sha256
/// of the compressed public key.
#[derive(Clone)]
pub struct Signer {
    secret: SecretKey,
    address: Address,
}

impl Signer {
    pub fn random() -> Self {
        Self::from_secret(SecretKey::new(&mut rand::thread_rng()))
    }

    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let secret = SecretKey::from_slice(bytes)
            .map_err(|e| ChannelError::crypto(format!("Invalid secret key: {}", e)))?;
        Ok(Self::from_secret(secret))
    }

    fn from_secret(secret: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public = PublicKey::from_secret_key(&secp, &secret);
        Self {
            secret,
            address: address_of(&public),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn sign(&self, msg: &[u8]) -> Signature {
        let secp = Secp256k1::new();
        let digest: [u8; 32] = Sha256::digest(msg).into();
        let message = Message::from_digest(digest);
        let (recovery_id, compact) = secp
            .sign_ecdsa_recoverable(&message, &self.secret)
            .serialize_compact();

        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&compact);
        out[64] = recovery_id.to_i32() as u8;
        Signature(out)
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("address", &self.address)
            .finish()
    }
}

/// Identity derivation from a public key.
pub fn address_of(public: &PublicKey) -> Address {
    let digest = Sha256::digest(public.serialize());
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[12..32]);
    Address(out)
}

/// Recover the signer identity of `msg` from a recoverable signature.
pub fn recover(msg: &[u8], signature: &Signature) -> Result<Address> {
    let secp = Secp256k1::new();
    let digest: [u8; 32] = Sha256::digest(msg).into();
    let message = Message::from_digest(digest);

    let recovery_id = RecoveryId::from_i32(signature.0[64] as i32)
        .map_err(|_| ChannelError::InvalidSignature)?;
    let recoverable = RecoverableSignature::from_compact(&signature.0[..64], recovery_id)
        .map_err(|_| ChannelError::InvalidSignature)?;
    let public = secp
        .recover_ecdsa(&message, &recoverable)
        .map_err(|_| ChannelError::InvalidSignature)?;

    Ok(address_of(&public))
}

/// Lifecycle of the on-chain channel record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnChainState {
    Open,
    Closed,
    Disputed,
}

/// What the contract stores per channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnChainChannel {
    pub state: OnChainState,
    pub player: Address,
    pub bankroller: Address,
    pub player_balance: u64,
    pub bankroller_balance: u64,
}

/// Tagged contract invocations. Every submission carries a fully typed
/// argument set; nothing on this boundary is stringly or dynamically typed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ContractCall {
    OpenChannel {
        channel_id: ChannelId,
        player: Address,
        bankroller: Address,
        player_deposit: u64,
        bankroller_deposit: u64,
        opening_block: u64,
        commitment: CommitmentPublic,
        signature: Signature,
    },
    CloseByConsent {
        state: StateData,
        consent: Signature,
    },
    OpenDispute {
        claim: DisputeClaim,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TxReceipt {
    pub block: u64,
    pub status: TxStatus,
}

/// Boundary to the settlement ledger.
///
/// Used only at open, close and dispute time; rounds never touch it.
#[allow(async_fn_in_trait)]
pub trait Ledger {
    async fn balance(&self, address: Address) -> Result<u64>;
    async fn allowance(&self, owner: Address) -> Result<u64>;
    async fn approve(&self, owner: Address, amount: u64) -> Result<()>;
    async fn block_number(&self) -> Result<u64>;
    async fn channel_info(&self, id: ChannelId) -> Result<Option<OnChainChannel>>;
    async fn submit(&self, caller: Address, call: ContractCall) -> Result<TxReceipt>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_recover_roundtrip() {
        let signer = Signer::random();
        let signature = signer.sign(b"open channel request");

        let recovered = recover(b"open channel request", &signature).unwrap();
        assert_eq!(recovered, signer.address());

        // Same signature over a different message recovers someone else.
        let other = recover(b"tampered request", &signature).unwrap();
        assert_ne!(other, signer.address());
    }

    #[test]
    fn test_from_secret_bytes_is_stable() {
        let a = Signer::from_secret_bytes(&[7u8; 32]).unwrap();
        let b = Signer::from_secret_bytes(&[7u8; 32]).unwrap();
        assert_eq!(a.address(), b.address());
    }

    #[test]
    fn test_recover_rejects_garbage_recovery_id() {
        let signer = Signer::random();
        let mut signature = signer.sign(b"msg");
        signature.0[64] = 9;
        assert!(recover(b"msg", &signature).is_err());
    }
}
