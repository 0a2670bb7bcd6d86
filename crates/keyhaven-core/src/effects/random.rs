//! Randomness effect

use async_trait::async_trait;

/// Source of cryptographically secure random bytes
///
/// Secret splitting never draws coefficients from this trait directly. Callers take a
/// 32-byte seed and expand it with a CSPRNG so a single effect call covers one split.
#[async_trait]
pub trait RandomEffects: Send + Sync {
    /// `len` random bytes
    async fn random_bytes(&self, len: usize) -> Vec<u8>;

    /// 32 random bytes
    async fn random_bytes_32(&self) -> [u8; 32];

    /// 16 random bytes, used for identifiers
    async fn random_bytes_16(&self) -> [u8; 16] {
        let bytes = self.random_bytes(16).await;
        let mut out = [0u8; 16];
        let n = bytes.len().min(16);
        out[..n].copy_from_slice(&bytes[..n]);
        out
    }
}

/// Blanket implementation for Arc<T> where T: RandomEffects
#[async_trait]
impl<T: RandomEffects + ?Sized> RandomEffects for std::sync::Arc<T> {
    async fn random_bytes(&self, len: usize) -> Vec<u8> {
        (**self).random_bytes(len).await
    }

    async fn random_bytes_32(&self) -> [u8; 32] {
        (**self).random_bytes_32().await
    }

    async fn random_bytes_16(&self) -> [u8; 16] {
        (**self).random_bytes_16().await
    }
}
