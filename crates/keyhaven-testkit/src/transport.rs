//! Scripted storage transport
//!
//! Every provider succeeds unless a test says otherwise. Failures and delays are set
//! per provider and can be healed again. Each successful upload is recorded with its
//! payload so tests can fetch shares back from "the network".

use async_trait::async_trait;
use keyhaven_core::crypto::hash::hash;
use keyhaven_core::{Address, StorageTransportEffects, TransportError, UploadReceipt, DAY_MS};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// One accepted upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpload {
    /// Receiving provider
    pub provider: Address,
    /// Deal id handed back
    pub deal_id: String,
    /// Content id handed back
    pub data_cid: String,
    /// Uploaded bytes
    pub payload: Vec<u8>,
}

#[derive(Debug)]
struct ScriptState {
    failing_uploads: HashSet<Address>,
    failing_renewals: HashSet<Address>,
    upload_delays: HashMap<Address, u64>,
    prices: HashMap<Address, u64>,
    deal_duration_ms: u64,
    next_deal: u64,
    uploads: Vec<RecordedUpload>,
    renewals: Vec<(Address, String, u64)>,
    upload_attempts: Vec<Address>,
}

/// Storage transport driven by per-provider scripts
#[derive(Debug, Clone)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    /// Transport where every provider accepts 30-day deals at price 1
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                failing_uploads: HashSet::new(),
                failing_renewals: HashSet::new(),
                upload_delays: HashMap::new(),
                prices: HashMap::new(),
                deal_duration_ms: 30 * DAY_MS,
                next_deal: 1,
                uploads: Vec::new(),
                renewals: Vec::new(),
                upload_attempts: Vec::new(),
            })),
        }
    }

    /// Uploads to `provider` fail until healed
    pub fn fail_uploads_to(&self, provider: Address) {
        self.state.lock().failing_uploads.insert(provider);
    }

    /// Renewals with `provider` fail until healed
    pub fn fail_renewals_to(&self, provider: Address) {
        self.state.lock().failing_renewals.insert(provider);
    }

    /// Clear every scripted failure and delay for `provider`
    pub fn heal(&self, provider: Address) {
        let mut state = self.state.lock();
        state.failing_uploads.remove(&provider);
        state.failing_renewals.remove(&provider);
        state.upload_delays.remove(&provider);
    }

    /// Uploads to `provider` sleep `ms` before answering
    pub fn delay_uploads_to(&self, provider: Address, ms: u64) {
        self.state.lock().upload_delays.insert(provider, ms);
    }

    /// Price quoted by `provider`
    pub fn set_price(&self, provider: Address, price: u64) {
        self.state.lock().prices.insert(provider, price);
    }

    /// Duration of every new deal
    pub fn set_deal_duration_ms(&self, ms: u64) {
        self.state.lock().deal_duration_ms = ms;
    }

    /// Accepted uploads, in completion order
    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.state.lock().uploads.clone()
    }

    /// Providers an upload was attempted against, including failures
    pub fn upload_attempts(&self) -> Vec<Address> {
        self.state.lock().upload_attempts.clone()
    }

    /// Payload most recently stored with `provider`
    pub fn stored_payload(&self, provider: &Address) -> Option<Vec<u8>> {
        self.state
            .lock()
            .uploads
            .iter()
            .rev()
            .find(|u| &u.provider == provider)
            .map(|u| u.payload.clone())
    }

    /// Accepted renewals as `(provider, deal_id, new_end_epoch_ms)`
    pub fn renewals(&self) -> Vec<(Address, String, u64)> {
        self.state.lock().renewals.clone()
    }
}

#[async_trait]
impl StorageTransportEffects for ScriptedTransport {
    async fn upload(
        &self,
        provider: &Address,
        payload: &[u8],
    ) -> Result<UploadReceipt, TransportError> {
        let delay = {
            let mut state = self.state.lock();
            state.upload_attempts.push(*provider);
            state.upload_delays.get(provider).copied()
        };
        if let Some(ms) = delay {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        let mut state = self.state.lock();
        if state.failing_uploads.contains(provider) {
            return Err(TransportError::Unreachable {
                provider: *provider,
            });
        }
        let deal_id = format!("deal-{}", state.next_deal);
        state.next_deal += 1;
        let data_cid = format!("cid-{}", &hex::encode(hash(payload))[..16]);
        let receipt = UploadReceipt {
            data_cid: data_cid.clone(),
            deal_id: deal_id.clone(),
            price: state.prices.get(provider).copied().unwrap_or(1),
            duration_ms: state.deal_duration_ms,
        };
        state.uploads.push(RecordedUpload {
            provider: *provider,
            deal_id,
            data_cid,
            payload: payload.to_vec(),
        });
        Ok(receipt)
    }

    async fn renew(
        &self,
        provider: &Address,
        deal_id: &str,
        new_end_epoch_ms: u64,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.failing_renewals.contains(provider) {
            return Err(TransportError::Rejected {
                provider: *provider,
                reason: "renewal refused".to_string(),
            });
        }
        state
            .renewals
            .push((*provider, deal_id.to_string(), new_end_epoch_ms));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::address;

    #[tokio::test]
    async fn scripted_failures_and_healing() {
        let transport = ScriptedTransport::new();
        transport.fail_uploads_to(address(2));

        assert!(transport.upload(&address(1), b"a").await.is_ok());
        assert!(transport.upload(&address(2), b"b").await.is_err());
        transport.heal(address(2));
        assert!(transport.upload(&address(2), b"c").await.is_ok());

        assert_eq!(transport.uploads().len(), 2);
        assert_eq!(transport.upload_attempts().len(), 3);
        assert_eq!(transport.stored_payload(&address(2)).unwrap(), b"c");
    }

    #[tokio::test]
    async fn deal_ids_are_unique() {
        let transport = ScriptedTransport::new();
        let a = transport.upload(&address(1), b"x").await.unwrap();
        let b = transport.upload(&address(1), b"x").await.unwrap();
        assert_ne!(a.deal_id, b.deal_id);
        assert_eq!(a.data_cid, b.data_cid);
    }
}
