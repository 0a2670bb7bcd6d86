//! Storage domain facts
//!
//! Every provider and deal transition commits one of these to the ledger journal in the
//! same transaction as the record change, keyed by the record's ledger key.

use crate::types::StorageDeal;
use keyhaven_core::{Address, Hash32, KeyhavenResult, PendingEvent};
use serde::{Deserialize, Serialize};

/// Type identifier for storage facts
pub const STORAGE_FACT_TYPE_ID: &str = "storage";

/// Storage domain fact types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageFact {
    /// Provider added to the registry
    ProviderRegistered {
        /// Provider account
        provider: Address,
        /// Initial reputation
        reputation_score: u8,
        /// Quoted price
        price: u64,
        /// Registration time (ms since epoch)
        registered_at_ms: u64,
    },
    /// Provider activated or deactivated
    ProviderStatusChanged {
        /// Provider account
        provider: Address,
        /// New status
        is_active: bool,
        /// Change time (ms since epoch)
        changed_at_ms: u64,
    },
    /// Provider reputation changed
    ReputationUpdated {
        /// Provider account
        provider: Address,
        /// New score
        reputation_score: u8,
        /// Change time (ms since epoch)
        updated_at_ms: u64,
    },
    /// Upload to a provider started
    DealPending {
        /// Logical data id
        data_hash: Hash32,
        /// Provider account
        provider: Address,
        /// Start time (ms since epoch)
        started_at_ms: u64,
    },
    /// Provider accepted the upload
    DealActivated {
        /// Logical data id
        data_hash: Hash32,
        /// Provider account
        provider: Address,
        /// Provider deal id
        deal_id: String,
        /// Deal end (ms since epoch)
        end_epoch_ms: u64,
    },
    /// Upload failed
    DealFailed {
        /// Logical data id
        data_hash: Hash32,
        /// Provider account
        provider: Address,
        /// Failure reason
        reason: String,
    },
    /// Deal extended
    DealRenewed {
        /// Logical data id
        data_hash: Hash32,
        /// Provider account
        provider: Address,
        /// Provider deal id
        deal_id: String,
        /// New deal end (ms since epoch)
        end_epoch_ms: u64,
    },
    /// Provider refused a renewal; the deal is unchanged
    DealRenewalFailed {
        /// Logical data id
        data_hash: Hash32,
        /// Provider account
        provider: Address,
        /// Provider deal id
        deal_id: String,
        /// Failure reason
        reason: String,
    },
    /// Deal ran past its end
    DealExpired {
        /// Logical data id
        data_hash: Hash32,
        /// Provider account
        provider: Address,
        /// Provider deal id
        deal_id: String,
    },
}

impl StorageFact {
    /// Get the sub-type string for this fact variant
    pub fn sub_type(&self) -> &'static str {
        match self {
            StorageFact::ProviderRegistered { .. } => "provider-registered",
            StorageFact::ProviderStatusChanged { .. } => "provider-status-changed",
            StorageFact::ReputationUpdated { .. } => "reputation-updated",
            StorageFact::DealPending { .. } => "deal-pending",
            StorageFact::DealActivated { .. } => "deal-activated",
            StorageFact::DealFailed { .. } => "deal-failed",
            StorageFact::DealRenewed { .. } => "deal-renewed",
            StorageFact::DealRenewalFailed { .. } => "deal-renewal-failed",
            StorageFact::DealExpired { .. } => "deal-expired",
        }
    }

    /// Journal tag, `storage:<sub-type>`
    pub fn fact_type(&self) -> String {
        format!("{STORAGE_FACT_TYPE_ID}:{}", self.sub_type())
    }

    /// Journal event for the record at `key`
    pub fn to_event(&self, key: &str) -> KeyhavenResult<PendingEvent> {
        PendingEvent::json(self.fact_type(), key, self)
    }

    /// Activation fact for a deal that just went live
    pub fn activated(deal: &StorageDeal) -> Self {
        StorageFact::DealActivated {
            data_hash: deal.data_hash,
            provider: deal.provider,
            deal_id: deal.deal_id.clone(),
            end_epoch_ms: deal.end_epoch_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_carries_type_and_payload() {
        let fact = StorageFact::DealFailed {
            data_hash: Hash32::of(b"x"),
            provider: Address::from_bytes([3; 20]),
            reason: "unreachable".into(),
        };
        let event = fact.to_event("storage:deal:abc").unwrap();
        assert_eq!(event.fact_type, "storage:deal-failed");
        assert_eq!(event.key, "storage:deal:abc");
        let decoded: StorageFact = serde_json::from_slice(&event.payload).unwrap();
        assert_eq!(decoded, fact);
    }
}
