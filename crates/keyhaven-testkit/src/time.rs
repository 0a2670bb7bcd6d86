//! Controllable time source for deterministic testing

use async_trait::async_trait;
use keyhaven_core::{PhysicalTime, PhysicalTimeEffects, TimeError};
use parking_lot::Mutex;
use std::sync::Arc;

/// Clock that only moves when a test moves it
///
/// Clones share the same underlying time.
#[derive(Debug, Clone)]
pub struct ControllableTimeSource {
    current_ms: Arc<Mutex<u64>>,
}

impl ControllableTimeSource {
    /// Start at `initial_ms`
    pub fn new(initial_ms: u64) -> Self {
        Self {
            current_ms: Arc::new(Mutex::new(initial_ms)),
        }
    }

    /// Advance by `ms` milliseconds
    pub fn advance_ms(&self, ms: u64) {
        *self.current_ms.lock() += ms;
    }

    /// Set absolute time
    pub fn set_time_ms(&self, ms: u64) {
        *self.current_ms.lock() = ms;
    }

    /// Current time in milliseconds
    pub fn current_ms(&self) -> u64 {
        *self.current_ms.lock()
    }
}

#[async_trait]
impl PhysicalTimeEffects for ControllableTimeSource {
    async fn physical_time(&self) -> Result<PhysicalTime, TimeError> {
        Ok(PhysicalTime::from_ms(self.current_ms()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_share_time() {
        let clock = ControllableTimeSource::new(100);
        let other = clock.clone();
        other.advance_ms(50);
        assert_eq!(clock.physical_time().await.unwrap().ts_ms, 150);
        clock.set_time_ms(7);
        assert_eq!(other.current_ms(), 7);
    }
}
