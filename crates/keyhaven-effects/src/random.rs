//! Random effect handler
//!
//! Uses `rand::thread_rng()`, a ChaCha-based CSPRNG seeded from the operating system.

use async_trait::async_trait;
use keyhaven_core::RandomEffects;
use rand::RngCore;

/// Real random handler using cryptographically secure randomness
#[derive(Debug, Clone, Default)]
pub struct RealRandomHandler;

impl RealRandomHandler {
    /// Create a new real random handler
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RandomEffects for RealRandomHandler {
    async fn random_bytes(&self, len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes
    }

    async fn random_bytes_32(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes
    }

    async fn random_bytes_16(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn produces_requested_lengths() {
        let handler = RealRandomHandler::new();
        assert_eq!(handler.random_bytes(0).await.len(), 0);
        assert_eq!(handler.random_bytes(77).await.len(), 77);
        assert_ne!(handler.random_bytes_32().await, handler.random_bytes_32().await);
    }
}
