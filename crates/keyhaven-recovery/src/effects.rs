//! Effect composition for recovery operations
//!
//! Sessions only need the clock, randomness for ids, and the ledger. The orchestrator
//! also backs secrets up to storage providers, which adds the storage transport.

use keyhaven_core::{LedgerEffects, PhysicalTimeEffects, RandomEffects, StorageTransportEffects};

/// Effects required by the Shamir and guardian sessions
pub trait RecoveryEffects: PhysicalTimeEffects + RandomEffects + LedgerEffects + Send + Sync {}

/// Blanket implementation for any type that implements all required traits.
impl<T> RecoveryEffects for T where T: PhysicalTimeEffects + RandomEffects + LedgerEffects + Send + Sync {}

/// [`RecoveryEffects`] plus the storage transport used for backups
pub trait RecoveryStorageEffects: RecoveryEffects + StorageTransportEffects {}

/// Blanket implementation for any type that implements all required traits.
impl<T> RecoveryStorageEffects for T where T: RecoveryEffects + StorageTransportEffects {}
