//! Keyhaven Core - foundation types and effect interfaces
//!
//! This crate holds everything the recovery crates share without depending on each
//! other: identifiers, the unified error type, SHA-256 content hashing, the effect
//! interfaces (ports) through which all time, randomness, persistence and storage
//! transport are reached, and layered configuration.
//!
//! # Effect Interfaces
//! - [`PhysicalTimeEffects`]: the single ledger-agreed clock
//! - [`RandomEffects`]: cryptographic randomness
//! - [`LedgerEffects`]: versioned records with atomic compare-and-set transactions
//!   and an append-only event journal
//! - [`StorageTransportEffects`]: upload and renew against storage providers
//!
//! Implementations live in `keyhaven-effects` (production) and `keyhaven-testkit`
//! (deterministic test doubles).

#![forbid(unsafe_code)]

/// Layered configuration (defaults, TOML, environment)
pub mod config;

/// Content hashing
pub mod crypto;

/// Effect interfaces
pub mod effects;

/// Unified error handling
pub mod errors;

/// Identifier types
pub mod types;

pub use config::{KeyhavenConfig, RecoverySettings, StorageSettings};
pub use crypto::hash::{hash, Hash32};
pub use effects::{
    ledger::{
        load_record, load_records, CommitReceipt, ConditionalWrite, LedgerEffects, LedgerError,
        LedgerEvent, PendingEvent, Transaction, Versioned,
    },
    random::RandomEffects,
    time::{PhysicalTime, PhysicalTimeEffects, TimeError},
    transport::{StorageTransportEffects, TransportError, UploadReceipt},
};
pub use errors::{ErrorKind, KeyhavenError, KeyhavenResult};
pub use types::identifiers::{Address, KeyId, ProposalId, SessionId};

/// One hour in milliseconds
pub const HOUR_MS: u64 = 60 * 60 * 1000;

/// One day in milliseconds
pub const DAY_MS: u64 = 24 * HOUR_MS;
