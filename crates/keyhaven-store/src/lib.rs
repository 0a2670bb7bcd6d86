//! Keyhaven Store - redundant storage of shares
//!
//! Selects storage providers by reputation and price, uploads payloads to them
//! concurrently, and tracks each resulting deal through
//! `Pending -> Active -> {Renewed | Expired}` (or `Failed`). A distribution only
//! succeeds when enough live replicas exist afterwards. Partial success is reported as
//! [`keyhaven_core::KeyhavenError::RedundancyNotMet`] together with the providers that
//! failed, so callers can retry exactly those.
//!
//! Providers, deals and their transitions are persisted through the ledger effect and
//! journaled as [`StorageFact`]s.

#![forbid(unsafe_code)]

pub mod coordinator;
pub mod effects;
pub mod facts;
pub mod replication;
pub mod selection;
pub mod types;

pub use coordinator::StorageCoordinator;
pub use effects::StorageEffects;
pub use facts::{StorageFact, STORAGE_FACT_TYPE_ID};
pub use replication::{ReplicationStats, ReplicationTracker};
pub use selection::select_providers;
pub use types::{
    Assignment, DealStatus, DistributionReport, DistributionRequest, RedundancyConfig,
    RenewalReport, StorageDeal, StorageProvider,
};
