//! Storage transport effect
//!
//! The custodian network is a black box: the coordinator hands a payload to a provider
//! and gets back a receipt or a failure. Each call is independent of every other.

use crate::errors::KeyhavenError;
use crate::types::identifiers::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Acknowledgement of a successful upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    /// Content identifier the provider stored the payload under
    pub data_cid: String,
    /// Provider-assigned deal identifier
    pub deal_id: String,
    /// Agreed price for the deal
    pub price: u64,
    /// Deal duration in milliseconds
    pub duration_ms: u64,
}

/// Transport failure for one provider
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum TransportError {
    /// Provider could not be reached
    #[error("Provider {provider} unreachable")]
    Unreachable {
        /// Provider address
        provider: Address,
    },
    /// Provider refused the request
    #[error("Provider {provider} rejected request: {reason}")]
    Rejected {
        /// Provider address
        provider: Address,
        /// Provider reason
        reason: String,
    },
    /// Request did not finish in time
    #[error("Provider {provider} timed out after {timeout_ms}ms")]
    Timeout {
        /// Provider address
        provider: Address,
        /// Timeout that elapsed
        timeout_ms: u64,
    },
}

impl From<TransportError> for KeyhavenError {
    fn from(err: TransportError) -> Self {
        KeyhavenError::transport(err.to_string())
    }
}

/// Upload and renewal against storage providers
#[async_trait]
pub trait StorageTransportEffects: Send + Sync {
    /// Store `payload` with `provider`
    async fn upload(
        &self,
        provider: &Address,
        payload: &[u8],
    ) -> Result<UploadReceipt, TransportError>;

    /// Extend an existing deal to `new_end_epoch_ms`
    async fn renew(
        &self,
        provider: &Address,
        deal_id: &str,
        new_end_epoch_ms: u64,
    ) -> Result<(), TransportError>;
}

/// Blanket implementation for Arc<T> where T: StorageTransportEffects
#[async_trait]
impl<T: StorageTransportEffects + ?Sized> StorageTransportEffects for std::sync::Arc<T> {
    async fn upload(
        &self,
        provider: &Address,
        payload: &[u8],
    ) -> Result<UploadReceipt, TransportError> {
        (**self).upload(provider, payload).await
    }

    async fn renew(
        &self,
        provider: &Address,
        deal_id: &str,
        new_end_epoch_ms: u64,
    ) -> Result<(), TransportError> {
        (**self).renew(provider, deal_id, new_end_epoch_ms).await
    }
}
