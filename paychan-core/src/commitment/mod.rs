//! Dealer-held commitment keypair.
//!
//! The randomness of every round is derived from an RSA signature over the
//! round hash, so the signature has to be reproducible: PKCS#1 v1.5 over a
//! Sha256 digest signs the same message to the same bytes every time. The
//! public half travels to the player inside the open-channel reply.

use crate::error::{ChannelError, Result};
use crate::types::hex_bytes;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const DEFAULT_KEY_BITS: usize = 2048;

/// Public modulus/exponent pair, big-endian bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentPublic {
    #[serde(with = "hex_bytes")]
    pub n: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub e: Vec<u8>,
}

impl CommitmentPublic {
    /// Verify a commitment signature over `msg`.
    pub fn verify(&self, msg: &[u8], signature: &[u8]) -> bool {
        let key = match RsaPublicKey::new(
            BigUint::from_bytes_be(&self.n),
            BigUint::from_bytes_be(&self.e),
        ) {
            Ok(key) => key,
            Err(_) => return false,
        };

        let digest: [u8; 32] = Sha256::digest(msg).into();
        key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
            .is_ok()
    }
}

/// The dealer's private commitment key.
pub struct CommitmentKey {
    key: RsaPrivateKey,
    public: CommitmentPublic,
}

impl CommitmentKey {
    pub fn generate() -> Result<Self> {
        Self::generate_with_size(DEFAULT_KEY_BITS)
    }

    pub fn generate_with_size(bits: usize) -> Result<Self> {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), bits)
            .map_err(|e| ChannelError::crypto(format!("RSA key generation failed: {}", e)))?;
        Ok(Self::from_key(key))
    }

    fn from_key(key: RsaPrivateKey) -> Self {
        let public_key = key.to_public_key();
        let public = CommitmentPublic {
            n: public_key.n().to_bytes_be(),
            e: public_key.e().to_bytes_be(),
        };
        Self { key, public }
    }

    pub fn public(&self) -> &CommitmentPublic {
        &self.public
    }

    /// Sign `msg`. Deterministic: the same message yields the same bytes.
    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>> {
        let digest: [u8; 32] = Sha256::digest(msg).into();
        self.key
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .map_err(|e| ChannelError::crypto(format!("RSA signing failed: {}", e)))
    }
}

impl std::fmt::Debug for CommitmentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitmentKey")
            .field("n_bits", &(self.public.n.len() * 8))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let key = CommitmentKey::generate_with_size(512).unwrap();
        let sig = key.sign(b"round hash").unwrap();

        assert!(key.public().verify(b"round hash", &sig));
        assert!(!key.public().verify(b"other message", &sig));
    }

    #[test]
    fn test_signing_is_deterministic() {
        let key = CommitmentKey::generate_with_size(512).unwrap();
        let a = key.sign(b"session 7").unwrap();
        let b = key.sign(b"session 7").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_verify_rejects_foreign_key() {
        let key = CommitmentKey::generate_with_size(512).unwrap();
        let other = CommitmentKey::generate_with_size(512).unwrap();
        let sig = key.sign(b"round hash").unwrap();
        assert!(!other.public().verify(b"round hash", &sig));
    }

    #[test]
    fn test_public_roundtrip() {
        let key = CommitmentKey::generate_with_size(512).unwrap();
        let json = serde_json::to_string(key.public()).unwrap();
        let back: CommitmentPublic = serde_json::from_str(&json).unwrap();

        let sig = key.sign(b"msg").unwrap();
        assert!(back.verify(b"msg", &sig));
    }
}
