//! Deterministic randomness
//!
//! Output is the concatenation of `SHA-256(seed || counter)` blocks, so two handlers
//! with the same seed produce the same stream. Not for production use.

use async_trait::async_trait;
use keyhaven_core::crypto::hash::hash_parts;
use keyhaven_core::RandomEffects;
use parking_lot::Mutex;
use std::sync::Arc;

/// Seeded random stream
#[derive(Debug, Clone)]
pub struct DeterministicRandom {
    seed: [u8; 8],
    counter: Arc<Mutex<u64>>,
}

impl DeterministicRandom {
    /// Create from a numeric seed
    pub fn new(seed: u64) -> Self {
        Self {
            seed: seed.to_be_bytes(),
            counter: Arc::new(Mutex::new(0)),
        }
    }

    fn next_block(&self) -> [u8; 32] {
        let mut counter = self.counter.lock();
        let block = hash_parts(&[&self.seed, &counter.to_be_bytes()]);
        *counter += 1;
        block
    }

    fn fill(&self, out: &mut [u8]) {
        for chunk in out.chunks_mut(32) {
            let block = self.next_block();
            chunk.copy_from_slice(&block[..chunk.len()]);
        }
    }
}

#[async_trait]
impl RandomEffects for DeterministicRandom {
    async fn random_bytes(&self, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.fill(&mut out);
        out
    }

    async fn random_bytes_32(&self) -> [u8; 32] {
        self.next_block()
    }
}
