//! Keyhaven Testing Infrastructure
//!
//! Deterministic stand-ins for every effect, so recovery flows can be driven step by
//! step in tests:
//!
//! - [`ControllableTimeSource`]: a clock that only moves when told to
//! - [`DeterministicRandom`]: a seeded SHA-256 counter stream
//! - [`ScriptedTransport`]: a storage transport whose failures are scripted per provider
//! - [`TestEffects`]: all of the above plus a `MemoryLedgerHandler`
//!
//! ```rust,no_run
//! use keyhaven_testkit::*;
//!
//! let effects = TestEffects::new(42, 1_000);
//! effects.transport().fail_uploads_to(address(3));
//! effects.time().advance_ms(60_000);
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod effects;
pub mod fixtures;
pub mod logging;
pub mod random;
pub mod time;
pub mod transport;

pub use effects::TestEffects;
pub use fixtures::*;
pub use logging::init_test_tracing;
pub use random::DeterministicRandom;
pub use time::ControllableTimeSource;
pub use transport::{RecordedUpload, ScriptedTransport};
