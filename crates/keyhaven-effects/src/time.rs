//! Time effect handler - production only
//!
//! Reads the operating system wall clock. Mock clocks belong in `keyhaven-testkit`.

use async_trait::async_trait;
use keyhaven_core::{PhysicalTime, PhysicalTimeEffects, TimeError};
use std::time::{SystemTime, UNIX_EPOCH};

/// Real time handler for production use
#[derive(Debug, Clone, Default)]
pub struct RealTimeHandler;

impl RealTimeHandler {
    /// Create a new real time handler
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PhysicalTimeEffects for RealTimeHandler {
    async fn physical_time(&self) -> Result<PhysicalTime, TimeError> {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| TimeError::OperationFailed {
                reason: format!("system clock before Unix epoch: {e}"),
            })?;
        Ok(PhysicalTime::from_ms(elapsed.as_millis() as u64))
    }
}
