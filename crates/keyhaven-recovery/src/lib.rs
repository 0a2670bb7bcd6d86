//! Keyhaven Recovery - getting a vault key back
//!
//! Two recovery paths guard each vault:
//!
//! - **Shamir**: the key is split into `N` shares held by custodians; any `M` of them,
//!   submitted to a session before its deadline, reconstruct it.
//! - **Guardians**: trusted accounts vote on a proposal to move ownership; a proposal
//!   executes only after its timelock and with enough approvals.
//!
//! [`RecoveryOrchestrator`] ties both to the vault record. It holds a per-vault lock
//! for every mutation and commits an ownership change in the same ledger transaction
//! as the session or proposal transition that authorizes it.

#![forbid(unsafe_code)]

pub mod effects;
pub mod facts;
pub mod guardian_session;
mod keys;
pub mod locks;
pub mod orchestrator;
pub mod shamir_session;
pub mod types;

pub use effects::{RecoveryEffects, RecoveryStorageEffects};
pub use facts::{RecoveryFact, RECOVERY_FACT_TYPE_ID};
pub use guardian_session::GuardianSessions;
pub use locks::VaultLocks;
pub use orchestrator::RecoveryOrchestrator;
pub use shamir_session::{integrity_hash, ShamirSessions};
pub use types::{
    BackupReceipt, Guardian, OwnershipTransfer, ProposalStatus, RecoveryHandle,
    RecoveryInitiation, RecoveryMethod, RecoveryProposal, ShamirConfig, ShamirRecoveryOutcome,
    ShamirRecoverySession, ShareRecord, SocialConfig, VaultRecord, VoteChoice, VoteRecord,
};
