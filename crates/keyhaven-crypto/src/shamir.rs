//! Shamir secret sharing over GF(256)
//!
//! A secret of any length is split byte by byte. For every byte position a fresh
//! polynomial of degree `M - 1` is drawn with the secret byte as its constant term and
//! `M - 1` coefficients from a CSPRNG, then evaluated at `x = 1..=N`. Share `i` holds
//! the evaluations at `x = i` for every byte, so each share is as long as the secret.
//! `x = 0` is the hidden secret and is never issued.
//!
//! Any `M` shares reconstruct the secret by Lagrange interpolation at zero. Fewer than
//! `M` shares are refused outright rather than interpolated into a wrong answer.
//!
//! Cost is `O(len * N * M)` field operations per split, which is fine for key-sized
//! secrets of a few kilobytes. Bulk data should be encrypted under a key and only the
//! key split.

use crate::polynomial::{lagrange_basis_at_zero, Polynomial};
use crate::gf256;
use keyhaven_core::{KeyId, KeyhavenError, KeyhavenResult};
use rand_core::{CryptoRng, RngCore};
use std::collections::HashSet;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Smallest permitted threshold
pub const MIN_THRESHOLD: usize = 2;

/// Largest permitted share count; x coordinates are non-zero field elements
pub const MAX_SHARES: usize = 255;

/// Validated `(M, N)` pair with `2 <= M <= N <= 255`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShamirParams {
    threshold: u8,
    total_shares: u8,
}

impl ShamirParams {
    /// Validate a threshold and share count
    pub fn new(threshold: usize, total_shares: usize) -> KeyhavenResult<Self> {
        if threshold < MIN_THRESHOLD {
            return Err(KeyhavenError::invalid(format!(
                "threshold {threshold} is below the minimum of {MIN_THRESHOLD}"
            )));
        }
        if threshold > total_shares {
            return Err(KeyhavenError::invalid(format!(
                "threshold {threshold} exceeds total shares {total_shares}"
            )));
        }
        if total_shares > MAX_SHARES {
            return Err(KeyhavenError::invalid(format!(
                "total shares {total_shares} exceeds the maximum of {MAX_SHARES}"
            )));
        }
        Ok(Self {
            threshold: threshold as u8,
            total_shares: total_shares as u8,
        })
    }

    /// Threshold `M`
    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Share count `N`
    pub fn total_shares(&self) -> u8 {
        self.total_shares
    }
}

/// One share of a split secret
///
/// Fields are private so a share cannot be altered after creation. The payload is
/// wiped on drop and never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretShare {
    index: u8,
    payload: Vec<u8>,
    threshold: u8,
    total_shares: u8,
    #[zeroize(skip)]
    key_id: KeyId,
    created_at_ms: u64,
}

impl SecretShare {
    /// Assemble a share from its parts, checking structural invariants
    pub fn from_parts(
        index: u8,
        payload: Vec<u8>,
        threshold: u8,
        total_shares: u8,
        key_id: KeyId,
        created_at_ms: u64,
    ) -> KeyhavenResult<Self> {
        ShamirParams::new(threshold as usize, total_shares as usize)?;
        if index == 0 || index > total_shares {
            return Err(KeyhavenError::invalid(format!(
                "share index {index} outside 1..={total_shares}"
            )));
        }
        if payload.is_empty() {
            return Err(KeyhavenError::invalid("share payload is empty"));
        }
        Ok(Self {
            index,
            payload,
            threshold,
            total_shares,
            key_id,
            created_at_ms,
        })
    }

    /// Evaluation point, `1..=N`
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Share bytes, one per secret byte
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Threshold `M`
    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Share count `N`
    pub fn total_shares(&self) -> u8 {
        self.total_shares
    }

    /// Group this share belongs to
    pub fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    /// Split time in milliseconds
    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }
}

impl fmt::Debug for SecretShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretShare")
            .field("index", &self.index)
            .field("threshold", &self.threshold)
            .field("total_shares", &self.total_shares)
            .field("key_id", &self.key_id)
            .field("len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

/// Split `secret` into `total_shares` shares, any `threshold` of which reconstruct it
pub fn split<R>(
    secret: &[u8],
    threshold: usize,
    total_shares: usize,
    key_id: &KeyId,
    created_at_ms: u64,
    rng: &mut R,
) -> KeyhavenResult<Vec<SecretShare>>
where
    R: RngCore + CryptoRng,
{
    let params = ShamirParams::new(threshold, total_shares)?;
    if secret.is_empty() {
        return Err(KeyhavenError::invalid("secret is empty"));
    }

    let m = params.threshold() as usize;
    let n = params.total_shares() as usize;
    let mut payloads: Vec<Vec<u8>> = (0..n).map(|_| vec![0u8; secret.len()]).collect();

    for (pos, &byte) in secret.iter().enumerate() {
        // Polynomial wipes its coefficients on drop
        let mut coefficients = vec![0u8; m];
        coefficients[0] = byte;
        rng.fill_bytes(&mut coefficients[1..]);
        let polynomial = Polynomial::new(coefficients);
        for (i, payload) in payloads.iter_mut().enumerate() {
            payload[pos] = polynomial.evaluate((i + 1) as u8);
        }
    }

    let shares = payloads
        .into_iter()
        .enumerate()
        .map(|(i, payload)| SecretShare {
            index: (i + 1) as u8,
            payload,
            threshold: params.threshold(),
            total_shares: params.total_shares(),
            key_id: key_id.clone(),
            created_at_ms,
        })
        .collect();

    tracing::debug!(
        key_id = %key_id,
        threshold = m,
        total_shares = n,
        len = secret.len(),
        "secret split into shares"
    );
    Ok(shares)
}

/// [`split`] with the thread-local OS-seeded CSPRNG
pub fn split_secret(
    secret: &[u8],
    threshold: usize,
    total_shares: usize,
    key_id: &KeyId,
    created_at_ms: u64,
) -> KeyhavenResult<Vec<SecretShare>> {
    split(
        secret,
        threshold,
        total_shares,
        key_id,
        created_at_ms,
        &mut rand::thread_rng(),
    )
}

/// Check that `shares` describe one split and have distinct indices
fn check_consistent(shares: &[SecretShare]) -> KeyhavenResult<()> {
    let Some(first) = shares.first() else {
        return Err(KeyhavenError::insufficient_shares(0, MIN_THRESHOLD));
    };
    let mut seen = HashSet::with_capacity(shares.len());
    for share in shares {
        if share.key_id != first.key_id {
            return Err(KeyhavenError::mismatched_shares(format!(
                "key ids {} and {} differ",
                first.key_id, share.key_id
            )));
        }
        if share.threshold != first.threshold || share.total_shares != first.total_shares {
            return Err(KeyhavenError::mismatched_shares(format!(
                "share {} is {}-of-{}, expected {}-of-{}",
                share.index, share.threshold, share.total_shares, first.threshold,
                first.total_shares
            )));
        }
        if share.payload.len() != first.payload.len() {
            return Err(KeyhavenError::mismatched_shares(format!(
                "share {} has length {}, expected {}",
                share.index,
                share.payload.len(),
                first.payload.len()
            )));
        }
        if !seen.insert(share.index) {
            return Err(KeyhavenError::mismatched_shares(format!(
                "share index {} appears twice",
                share.index
            )));
        }
    }
    Ok(())
}

/// Reconstruct the secret from at least `M` consistent shares
///
/// Only the first `M` shares in argument order are used. The secret is returned whole
/// or not at all.
pub fn reconstruct(shares: &[SecretShare]) -> KeyhavenResult<Zeroizing<Vec<u8>>> {
    check_consistent(shares)?;
    let m = shares[0].threshold as usize;
    if shares.len() < m {
        return Err(KeyhavenError::insufficient_shares(shares.len(), m));
    }

    let used = &shares[..m];
    let xs: Vec<u8> = used.iter().map(|s| s.index).collect();
    let basis = lagrange_basis_at_zero(&xs)?;

    let len = used[0].payload.len();
    let mut secret = Zeroizing::new(vec![0u8; len]);
    for (pos, out) in secret.iter_mut().enumerate() {
        *out = used
            .iter()
            .zip(basis.iter())
            .fold(0u8, |acc, (share, &l)| {
                gf256::add(acc, gf256::mul(share.payload[pos], l))
            });
    }
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn rng() -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(7)
    }

    fn key() -> KeyId {
        KeyId::new("vault-1")
    }

    #[test]
    fn params_bounds() {
        assert!(ShamirParams::new(2, 2).is_ok());
        assert!(ShamirParams::new(255, 255).is_ok());
        assert_matches!(
            ShamirParams::new(1, 3),
            Err(KeyhavenError::InvalidParameters { .. })
        );
        assert_matches!(
            ShamirParams::new(4, 3),
            Err(KeyhavenError::InvalidParameters { .. })
        );
        assert_matches!(
            ShamirParams::new(3, 256),
            Err(KeyhavenError::InvalidParameters { .. })
        );
    }

    #[test]
    fn split_rejects_empty_secret() {
        assert_matches!(
            split(&[], 2, 3, &key(), 0, &mut rng()),
            Err(KeyhavenError::InvalidParameters { .. })
        );
    }

    #[test]
    fn shares_carry_metadata() {
        let shares = split(b"secret", 3, 5, &key(), 1234, &mut rng()).unwrap();
        assert_eq!(shares.len(), 5);
        for (i, share) in shares.iter().enumerate() {
            assert_eq!(share.index() as usize, i + 1);
            assert_eq!(share.payload().len(), 6);
            assert_eq!(share.threshold(), 3);
            assert_eq!(share.total_shares(), 5);
            assert_eq!(share.key_id(), &key());
            assert_eq!(share.created_at_ms(), 1234);
        }
    }

    #[test]
    fn coefficients_differ_between_splits() {
        let mut rng = rng();
        let a = split(b"same secret", 2, 3, &key(), 0, &mut rng).unwrap();
        let b = split(b"same secret", 2, 3, &key(), 0, &mut rng).unwrap();
        assert_ne!(a[0].payload(), b[0].payload());
    }

    #[test]
    fn constant_secret_does_not_yield_constant_shares() {
        let shares = split(&[0xAA; 64], 2, 2, &key(), 0, &mut rng()).unwrap();
        let distinct: HashSet<u8> = shares[0].payload().iter().copied().collect();
        assert!(distinct.len() > 1);
    }

    #[test]
    fn only_first_m_shares_are_used() {
        let shares = split(b"abc", 2, 4, &key(), 0, &mut rng()).unwrap();
        let mut tampered = shares.clone();
        tampered[3] = SecretShare::from_parts(4, vec![0, 0, 0], 2, 4, key(), 0).unwrap();
        assert_eq!(reconstruct(&tampered).unwrap().as_slice(), b"abc");
    }

    #[test]
    fn reconstruct_rejects_mismatches() {
        let shares = split(b"abc", 2, 3, &key(), 0, &mut rng()).unwrap();
        let other = split(b"abc", 2, 3, &KeyId::new("other"), 0, &mut rng()).unwrap();

        assert_matches!(
            reconstruct(&[shares[0].clone(), other[1].clone()]),
            Err(KeyhavenError::MismatchedShares { .. })
        );
        assert_matches!(
            reconstruct(&[shares[0].clone(), shares[0].clone()]),
            Err(KeyhavenError::MismatchedShares { .. })
        );
        let short = SecretShare::from_parts(2, vec![1, 2], 2, 3, key(), 0).unwrap();
        assert_matches!(
            reconstruct(&[shares[0].clone(), short]),
            Err(KeyhavenError::MismatchedShares { .. })
        );
        assert_matches!(
            reconstruct(&[]),
            Err(KeyhavenError::InsufficientShares { provided: 0, .. })
        );
    }

    #[test]
    fn from_parts_validates_index() {
        assert_matches!(
            SecretShare::from_parts(0, vec![1], 2, 3, key(), 0),
            Err(KeyhavenError::InvalidParameters { .. })
        );
        assert_matches!(
            SecretShare::from_parts(4, vec![1], 2, 3, key(), 0),
            Err(KeyhavenError::InvalidParameters { .. })
        );
    }

    #[test]
    fn debug_never_prints_payload() {
        let share = SecretShare::from_parts(1, vec![0xfe; 4], 2, 3, key(), 0).unwrap();
        let text = format!("{share:?}");
        assert!(text.contains("len: 4"));
        assert!(!text.contains("254"));
    }
}
