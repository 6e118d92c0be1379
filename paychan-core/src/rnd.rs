//! Commit-reveal randomness.
//!
//! Maps an unforgeable signature to one integer per requested range, each
//! uniform over its inclusive bounds. Rejection sampling against the largest
//! multiple of the range width below 2^255 keeps the modulo unbiased; a
//! rejected candidate is re-hashed until it lands under the bound.

use crate::error::{ChannelError, Result};
use sha2::{Digest, Sha256};

/// Derive one random number per range from a commitment signature.
///
/// Deterministic: identical `(signature, ranges)` always produce the same
/// sequence, which is what lets the player re-derive and audit the dealer's
/// numbers after the fact.
pub fn generate(signature: &[u8], ranges: &[(u64, u64)]) -> Result<Vec<u64>> {
    ranges
        .iter()
        .enumerate()
        .map(|(index, &(min, max))| random_in_range(signature, index as u64, min, max))
        .collect()
}

fn random_in_range(signature: &[u8], index: u64, min: u64, max: u64) -> Result<u64> {
    let width = max
        .checked_sub(min)
        .and_then(|d| d.checked_add(1))
        .ok_or(ChannelError::InvalidRange { min, max })?;

    let bound = rejection_bound(width);

    let mut hasher = Sha256::new();
    hasher.update(signature);
    hasher.update(index.to_be_bytes());
    let mut candidate: [u8; 32] = hasher.finalize().into();

    while ge_be(&candidate, &bound) {
        candidate = Sha256::digest(candidate).into();
    }

    Ok(min + mod_width(&candidate, width))
}

/// Largest multiple of `width` not exceeding 2^255, as 32 big-endian bytes.
fn rejection_bound(width: u64) -> [u8; 32] {
    let w = width as u128;

    // 2^255 mod width, by repeated doubling.
    let mut rem: u128 = 1 % w;
    for _ in 0..255 {
        rem = (rem << 1) % w;
    }

    // 2^255 - rem across two 128-bit limbs.
    let (hi, lo): (u128, u128) = if rem == 0 {
        (1u128 << 127, 0)
    } else {
        ((1u128 << 127) - 1, 0u128.wrapping_sub(rem))
    };

    let mut out = [0u8; 32];
    out[..16].copy_from_slice(&hi.to_be_bytes());
    out[16..].copy_from_slice(&lo.to_be_bytes());
    out
}

fn ge_be(a: &[u8; 32], b: &[u8; 32]) -> bool {
    for (x, y) in a.iter().zip(b.iter()) {
        if x != y {
            return x > y;
        }
    }
    true
}

fn mod_width(bytes: &[u8; 32], width: u64) -> u64 {
    let w = width as u128;
    let rem = bytes
        .iter()
        .fold(0u128, |acc, &b| ((acc << 8) | b as u128) % w);
    rem as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let sig = b"commitment signature bytes";
        let ranges = [(0, 10), (50, 100), (1, 6)];

        let a = generate(sig, &ranges).unwrap();
        let b = generate(sig, &ranges).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_outputs_within_ranges() {
        for seed in 0u64..50 {
            let sig: [u8; 32] = Sha256::digest(seed.to_be_bytes()).into();
            let ranges = [(0, 1), (1, 6), (10, 10), (0, u64::MAX - 1)];
            let randoms = generate(&sig, &ranges).unwrap();

            assert_eq!(randoms.len(), ranges.len());
            for (value, (min, max)) in randoms.iter().zip(ranges.iter()) {
                assert!(value >= min && value <= max, "{} not in [{}, {}]", value, min, max);
            }
        }
    }

    #[test]
    fn test_different_signatures_diverge() {
        let ranges = [(0, u64::MAX - 1)];
        let a = generate(b"signature one", &ranges).unwrap();
        let b = generate(b"signature two", &ranges).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_index_separates_outputs() {
        // Two identical ranges should not collapse to one value.
        let ranges = [(0, u64::MAX - 1), (0, u64::MAX - 1)];
        let randoms = generate(b"sig", &ranges).unwrap();
        assert_ne!(randoms[0], randoms[1]);
    }

    #[test]
    fn test_inverted_and_full_ranges_rejected() {
        assert!(matches!(
            generate(b"sig", &[(5, 4)]),
            Err(ChannelError::InvalidRange { min: 5, max: 4 })
        ));
        // Width would overflow u64.
        assert!(generate(b"sig", &[(0, u64::MAX)]).is_err());
    }

    #[test]
    fn test_single_value_range() {
        assert_eq!(generate(b"sig", &[(42, 42)]).unwrap(), vec![42]);
    }

    #[test]
    fn test_rejection_bound_small_widths() {
        // Width 1 divides everything: bound is exactly 2^255.
        let bound = rejection_bound(1);
        assert_eq!(bound[0], 0x80);
        assert!(bound[1..].iter().all(|&b| b == 0));

        // Width 2 also divides 2^255 evenly.
        assert_eq!(rejection_bound(2), rejection_bound(1));
    }

    #[test]
    fn test_distribution_covers_small_range() {
        // Every face of a d6 should appear across enough signatures.
        let mut seen = [false; 6];
        for seed in 0u64..200 {
            let sig: [u8; 32] = Sha256::digest(seed.to_be_bytes()).into();
            let roll = generate(&sig, &[(1, 6)]).unwrap()[0];
            seen[(roll - 1) as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }
}
