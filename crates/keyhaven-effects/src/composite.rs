//! Composite effect handler
//!
//! Bundles the production clock, randomness and ledger with a storage transport. The
//! transport is generic because the custodian network is always supplied by the
//! embedding application.

use crate::{MemoryLedgerHandler, RealRandomHandler, RealTimeHandler};
use async_trait::async_trait;
use keyhaven_core::{
    Address, CommitReceipt, LedgerEffects, LedgerError, LedgerEvent, PhysicalTime,
    PhysicalTimeEffects, RandomEffects, StorageTransportEffects, TimeError, Transaction,
    TransportError, UploadReceipt, Versioned,
};

/// Every effect Keyhaven needs, in one value
#[derive(Debug, Clone)]
pub struct KeyhavenEffects<T> {
    time: RealTimeHandler,
    random: RealRandomHandler,
    ledger: MemoryLedgerHandler,
    transport: T,
}

impl<T: StorageTransportEffects> KeyhavenEffects<T> {
    /// Production handlers with a fresh in-memory ledger
    pub fn new(transport: T) -> Self {
        Self::with_ledger(MemoryLedgerHandler::new(), transport)
    }

    /// Production handlers over an existing ledger
    pub fn with_ledger(ledger: MemoryLedgerHandler, transport: T) -> Self {
        Self {
            time: RealTimeHandler::new(),
            random: RealRandomHandler::new(),
            ledger,
            transport,
        }
    }

    /// The ledger handler
    pub fn ledger(&self) -> &MemoryLedgerHandler {
        &self.ledger
    }

    /// The transport
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[async_trait]
impl<T: StorageTransportEffects> PhysicalTimeEffects for KeyhavenEffects<T> {
    async fn physical_time(&self) -> Result<PhysicalTime, TimeError> {
        self.time.physical_time().await
    }
}

#[async_trait]
impl<T: StorageTransportEffects> RandomEffects for KeyhavenEffects<T> {
    async fn random_bytes(&self, len: usize) -> Vec<u8> {
        self.random.random_bytes(len).await
    }

    async fn random_bytes_32(&self) -> [u8; 32] {
        self.random.random_bytes_32().await
    }

    async fn random_bytes_16(&self) -> [u8; 16] {
        self.random.random_bytes_16().await
    }
}

#[async_trait]
impl<T: StorageTransportEffects> LedgerEffects for KeyhavenEffects<T> {
    async fn read(&self, key: &str) -> Result<Option<Versioned<Vec<u8>>>, LedgerError> {
        self.ledger.read(key).await
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Versioned<Vec<u8>>)>, LedgerError> {
        self.ledger.scan(prefix).await
    }

    async fn commit(&self, tx: Transaction) -> Result<CommitReceipt, LedgerError> {
        self.ledger.commit(tx).await
    }

    async fn events_since(&self, after: u64) -> Result<Vec<LedgerEvent>, LedgerError> {
        self.ledger.events_since(after).await
    }
}

#[async_trait]
impl<T: StorageTransportEffects> StorageTransportEffects for KeyhavenEffects<T> {
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

#[cfg(test)]
mod tests {
    use super::*;

    struct Refusing;

    #[async_trait]
    impl StorageTransportEffects for Refusing {
        async fn upload(
            &self,
            provider: &Address,
            _payload: &[u8],
        ) -> Result<UploadReceipt, TransportError> {
            Err(TransportError::Unreachable {
                provider: *provider,
            })
        }

        async fn renew(
            &self,
            provider: &Address,
            _deal_id: &str,
            _new_end_epoch_ms: u64,
        ) -> Result<(), TransportError> {
            Err(TransportError::Unreachable {
                provider: *provider,
            })
        }
    }

    #[tokio::test]
    async fn delegates_to_each_handler() {
        let effects = KeyhavenEffects::new(Refusing);
        assert!(effects.physical_time().await.unwrap().ts_ms > 0);
        assert_eq!(effects.random_bytes(5).await.len(), 5);
        assert!(effects.read("missing").await.unwrap().is_none());
        assert!(effects.upload(&Address::ZERO, b"x").await.is_err());
    }
}
