//! Physical time effect
//!
//! All deadlines in Keyhaven are evaluated against one ledger-agreed clock. A mutation
//! reads `now` once through [`PhysicalTimeEffects::physical_time`] and uses that value
//! for every check in the call.

use crate::errors::KeyhavenError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Wall-clock instant in milliseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PhysicalTime {
    /// Milliseconds since the Unix epoch
    pub ts_ms: u64,
}

impl PhysicalTime {
    /// Create from milliseconds
    pub fn from_ms(ts_ms: u64) -> Self {
        Self { ts_ms }
    }
}

/// Error type for time operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum TimeError {
    /// The clock cannot be read
    #[error("Time service unavailable")]
    ServiceUnavailable,
    /// Any other clock failure
    #[error("Operation failed: {reason}")]
    OperationFailed {
        /// Failure reason
        reason: String,
    },
}

impl From<TimeError> for KeyhavenError {
    fn from(err: TimeError) -> Self {
        KeyhavenError::time(err.to_string())
    }
}

/// Source of the shared physical clock
#[async_trait]
pub trait PhysicalTimeEffects: Send + Sync {
    /// Current physical time
    async fn physical_time(&self) -> Result<PhysicalTime, TimeError>;
}

/// Blanket implementation for Arc<T> where T: PhysicalTimeEffects
#[async_trait]
impl<T: PhysicalTimeEffects + ?Sized> PhysicalTimeEffects for std::sync::Arc<T> {
    async fn physical_time(&self) -> Result<PhysicalTime, TimeError> {
        (**self).physical_time().await
    }
}
