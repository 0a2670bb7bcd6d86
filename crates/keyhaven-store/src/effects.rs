//! Effects required by the storage coordinator

use keyhaven_core::{LedgerEffects, PhysicalTimeEffects, StorageTransportEffects};

/// Clock, ledger and provider transport
pub trait StorageEffects:
    PhysicalTimeEffects + LedgerEffects + StorageTransportEffects + Send + Sync
{
}

impl<T> StorageEffects for T where
    T: PhysicalTimeEffects + LedgerEffects + StorageTransportEffects + Send + Sync
{
}
