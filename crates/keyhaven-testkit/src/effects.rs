//! Composed deterministic effects

use crate::{ControllableTimeSource, DeterministicRandom, ScriptedTransport};
use async_trait::async_trait;
use keyhaven_core::{
    Address, CommitReceipt, LedgerEffects, LedgerError, LedgerEvent, PhysicalTime,
    PhysicalTimeEffects, RandomEffects, StorageTransportEffects, TimeError, Transaction,
    TransportError, UploadReceipt, Versioned,
};
use keyhaven_effects::MemoryLedgerHandler;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Controllable clock, seeded randomness, in-memory ledger and scripted transport
///
/// Clones share all state, so a test can keep a handle while a service owns another.
#[derive(Debug, Clone)]
pub struct TestEffects {
    time: ControllableTimeSource,
    random: DeterministicRandom,
    ledger: MemoryLedgerHandler,
    transport: ScriptedTransport,
    failing_fact_types: Arc<Mutex<HashSet<String>>>,
}

impl TestEffects {
    /// Effects seeded with `seed`, clock starting at `start_ms`
    pub fn new(seed: u64, start_ms: u64) -> Self {
        Self {
            time: ControllableTimeSource::new(start_ms),
            random: DeterministicRandom::new(seed),
            ledger: MemoryLedgerHandler::new(),
            transport: ScriptedTransport::new(),
            failing_fact_types: Arc::default(),
        }
    }

    /// Refuse every commit that journals an event of `fact_type`
    pub fn fail_commits_with(&self, fact_type: impl Into<String>) {
        self.failing_fact_types.lock().insert(fact_type.into());
    }

    /// The clock
    pub fn time(&self) -> &ControllableTimeSource {
        &self.time
    }

    /// The ledger
    pub fn ledger(&self) -> &MemoryLedgerHandler {
        &self.ledger
    }

    /// The transport
    pub fn transport(&self) -> &ScriptedTransport {
        &self.transport
    }

    /// Every journal entry's fact type, in order
    pub async fn fact_types(&self) -> Vec<String> {
        self.ledger
            .events_since(0)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.fact_type)
            .collect()
    }
}

#[async_trait]
impl PhysicalTimeEffects for TestEffects {
    async fn physical_time(&self) -> Result<PhysicalTime, TimeError> {
        self.time.physical_time().await
    }
}

#[async_trait]
impl RandomEffects for TestEffects {
    async fn random_bytes(&self, len: usize) -> Vec<u8> {
        self.random.random_bytes(len).await
    }

    async fn random_bytes_32(&self) -> [u8; 32] {
        self.random.random_bytes_32().await
    }
}

#[async_trait]
impl LedgerEffects for TestEffects {
    async fn read(&self, key: &str) -> Result<Option<Versioned<Vec<u8>>>, LedgerError> {
        self.ledger.read(key).await
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Versioned<Vec<u8>>)>, LedgerError> {
        self.ledger.scan(prefix).await
    }

    async fn commit(&self, tx: Transaction) -> Result<CommitReceipt, LedgerError> {
        let refused = {
            let failing = self.failing_fact_types.lock();
            tx.events
                .iter()
                .find(|e| failing.contains(&e.fact_type))
                .map(|e| e.fact_type.clone())
        };
        if let Some(fact_type) = refused {
            return Err(LedgerError::Backend {
                reason: format!("scripted failure for {fact_type}"),
            });
        }
        self.ledger.commit(tx).await
    }

    async fn events_since(&self, after: u64) -> Result<Vec<LedgerEvent>, LedgerError> {
        self.ledger.events_since(after).await
    }
}

#[async_trait]
impl StorageTransportEffects for TestEffects {
    async fn upload(
        &self,
        provider: &Address,
        payload: &[u8],
    ) -> Result<UploadReceipt, TransportError> {
        self.transport.upload(provider, payload).await
    }

    async fn renew(
        &self,
        provider: &Address,
        deal_id: &str,
        new_end_epoch_ms: u64,
    ) -> Result<(), TransportError> {
        self.transport.renew(provider, deal_id, new_end_epoch_ms).await
    }
}
