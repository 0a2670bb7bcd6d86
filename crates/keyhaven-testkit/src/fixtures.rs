//! Common fixtures

use keyhaven_core::{Address, KeyId};

/// Distinct non-zero address for `n`
pub fn address(n: u32) -> Address {
    let mut bytes = [0u8; 20];
    bytes[0] = 0xa0;
    bytes[16..].copy_from_slice(&n.to_be_bytes());
    Address::from_bytes(bytes)
}

/// Vault id `vault-<n>`
pub fn key_id(n: u32) -> KeyId {
    KeyId::new(format!("vault-{n}"))
}

/// `len` bytes that look like a private key
pub fn sample_secret(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(73).wrapping_add(19)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_are_distinct_and_non_zero() {
        assert_ne!(address(1), address(2));
        assert!(!address(0).is_zero());
    }
}
