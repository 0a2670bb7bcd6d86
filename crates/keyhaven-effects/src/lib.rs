//! Keyhaven Effects - production effect handlers
//!
//! Stateless handlers for the system clock and OS randomness, the in-memory ledger,
//! and [`KeyhavenEffects`], which bundles them with a caller-supplied storage transport
//! into one value implementing every effect trait.
//!
//! Deterministic test doubles live in `keyhaven-testkit`.

#![forbid(unsafe_code)]

pub mod composite;
pub mod ledger;
pub mod random;
pub mod time;

pub use composite::KeyhavenEffects;
pub use ledger::MemoryLedgerHandler;
pub use random::RealRandomHandler;
pub use time::RealTimeHandler;
