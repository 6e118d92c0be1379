use crate::error::{ChannelError, Result};
use rand::RngCore;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// Opaque 32-byte channel identifier, assigned once at open.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(pub [u8; 32]);

impl ChannelId {
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Party identity: last 20 bytes of Sha256 over the compressed public key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

/// 64-byte compact recoverable ECDSA signature plus recovery id.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 65]);

impl Signature {
    pub fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }
}

/// Which side of the channel an amount or a failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Party {
    Player,
    Bankroller,
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Party::Player => write!(f, "player"),
            Party::Bankroller => write!(f, "bankroller"),
        }
    }
}

/// Out-of-band agreed channel parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRules {
    /// Bankroller deposit must equal player deposit times this factor.
    pub deposit_multiplier: u64,
    /// On-chain balance a party must keep beyond its deposit.
    pub min_reserve: u64,
    /// How long the player waits for one remote round exchange.
    pub round_timeout: Duration,
    /// Same-session retries before a timed-out round is abandoned.
    pub max_play_attempts: u32,
}

impl Default for ChannelRules {
    fn default() -> Self {
        Self {
            deposit_multiplier: 2,
            min_reserve: 1_000,
            round_timeout: Duration::from_secs(10),
            max_play_attempts: 3,
        }
    }
}

/// Checked sum of a bet series.
pub fn bets_total(bets: &[u64]) -> Result<u64> {
    bets.iter().try_fold(0u64, |acc, &b| {
        acc.checked_add(b)
            .ok_or_else(|| ChannelError::internal("bet sum overflow"))
    })
}

fn parse_fixed<const N: usize>(s: &str) -> std::result::Result<[u8; N], String> {
    let raw = hex::decode(s).map_err(|e| format!("invalid hex: {}", e))?;
    let mut out = [0u8; N];
    if raw.len() != N {
        return Err(format!("expected {} bytes, got {}", N, raw.len()));
    }
    out.copy_from_slice(&raw);
    Ok(out)
}

macro_rules! hex_newtype {
    ($name:ident, $len:expr) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(self.0))
            }
        }

        impl std::str::FromStr for $name {
            type Err = ChannelError;

            fn from_str(s: &str) -> Result<Self> {
                parse_fixed::<$len>(s)
                    .map($name)
                    .map_err(ChannelError::Internal)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&hex::encode(self.0))
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(
                deserializer: D,
            ) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                parse_fixed::<$len>(&s).map($name).map_err(D::Error::custom)
            }
        }
    };
}

hex_newtype!(ChannelId, 32);
hex_newtype!(Address, 20);
hex_newtype!(Signature, 65);

/// Serde adapter rendering byte vectors as hex strings.
pub mod hex_bytes {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &[u8],
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(D::Error::custom)
    }
}

/// Serde adapter for fixed-size byte arrays as hex strings.
pub mod hex_array {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> std::result::Result<[u8; N], D::Error> {
        let s = String::deserialize(deserializer)?;
        let raw = hex::decode(&s).map_err(D::Error::custom)?;
        raw.try_into()
            .map_err(|_| D::Error::custom(format!("expected {} bytes", N)))
    }
}
