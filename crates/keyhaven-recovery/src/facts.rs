//! Recovery domain facts
//!
//! Every recovery transition appends one of these to the ledger journal inside the
//! transaction that changes the record, so the journal replays the full audit trail
//! of configuration, share, session, guardian, proposal and ownership changes.

use crate::types::{RecoveryMethod, VoteChoice};
use keyhaven_core::{Address, Hash32, KeyId, KeyhavenResult, PendingEvent, ProposalId, SessionId};
use serde::{Deserialize, Serialize};

/// Type identifier for recovery facts
pub const RECOVERY_FACT_TYPE_ID: &str = "recovery";

/// Recovery domain fact types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RecoveryFact {
    // ========================================================================
    // Shamir lifecycle
    // ========================================================================
    /// Share layout fixed for a vault
    ShamirConfigured {
        /// Vault
        vault: KeyId,
        /// Threshold `M`
        threshold: u8,
        /// Share count `N`
        total_shares: u8,
        /// Timestamp (ms since epoch)
        configured_at_ms: u64,
    },

    /// Share location recorded
    ShareStored {
        /// Vault
        vault: KeyId,
        /// Share index
        index: u8,
        /// Custodian holding the share
        custodian_id: String,
        /// SHA-256 of the payload
        integrity_hash: Hash32,
        /// Timestamp (ms since epoch)
        stored_at_ms: u64,
    },

    /// Share revoked for all sessions
    ShareRevoked {
        /// Vault
        vault: KeyId,
        /// Share index
        index: u8,
        /// Timestamp (ms since epoch)
        revoked_at_ms: u64,
    },

    /// Shamir session opened
    RecoveryInitiated {
        /// Vault
        vault: KeyId,
        /// Session
        session_id: SessionId,
        /// Requesting account
        initiator: Address,
        /// Submission deadline (ms since epoch)
        deadline_ms: u64,
    },

    /// Share accepted into a session
    ShareSubmitted {
        /// Vault
        vault: KeyId,
        /// Session
        session_id: SessionId,
        /// Share index
        index: u8,
        /// Distinct shares after this submission
        submitted_count: u8,
        /// Timestamp (ms since epoch)
        submitted_at_ms: u64,
    },

    /// Session reached its threshold
    SessionCompleted {
        /// Vault
        vault: KeyId,
        /// Session
        session_id: SessionId,
        /// Timestamp (ms since epoch)
        completed_at_ms: u64,
    },

    /// Secret reconstructed from a session
    RecoveryCompleted {
        /// Vault
        vault: KeyId,
        /// Session
        session_id: SessionId,
        /// Timestamp (ms since epoch)
        completed_at_ms: u64,
    },

    // ========================================================================
    // Guardian lifecycle
    // ========================================================================
    /// Guardian voting configured
    SocialConfigured {
        /// Vault
        vault: KeyId,
        /// Approvals needed
        required_approvals: u32,
        /// Timelock (ms)
        recovery_delay_ms: u64,
        /// Timestamp (ms since epoch)
        configured_at_ms: u64,
    },

    /// Guardian added
    GuardianAdded {
        /// Vault
        vault: KeyId,
        /// Guardian account
        guardian: Address,
        /// Timestamp (ms since epoch)
        added_at_ms: u64,
    },

    /// Guardian removed
    GuardianRemoved {
        /// Vault
        vault: KeyId,
        /// Guardian account
        guardian: Address,
        /// Timestamp (ms since epoch)
        removed_at_ms: u64,
    },

    /// Ownership change proposed
    ProposalCreated {
        /// Vault
        vault: KeyId,
        /// Proposal
        proposal_id: ProposalId,
        /// Proposing guardian
        proposer: Address,
        /// Requested owner
        new_owner: Address,
        /// Voting deadline (ms since epoch)
        deadline_ms: u64,
    },

    /// Vote cast
    VoteCast {
        /// Vault
        vault: KeyId,
        /// Proposal
        proposal_id: ProposalId,
        /// Voter
        guardian: Address,
        /// Choice
        choice: VoteChoice,
        /// Timestamp (ms since epoch)
        cast_at_ms: u64,
    },

    /// Proposal certified for execution
    ProposalExecuted {
        /// Vault
        vault: KeyId,
        /// Proposal
        proposal_id: ProposalId,
        /// Timestamp (ms since epoch)
        executed_at_ms: u64,
    },

    /// Proposal closed without execution
    ProposalRejected {
        /// Vault
        vault: KeyId,
        /// Proposal
        proposal_id: ProposalId,
        /// Timestamp (ms since epoch)
        rejected_at_ms: u64,
    },

    // ========================================================================
    // Vault lifecycle
    // ========================================================================
    /// Vault registered with the orchestrator
    VaultRegistered {
        /// Vault
        vault: KeyId,
        /// Initial owner
        owner: Address,
        /// Timestamp (ms since epoch)
        registered_at_ms: u64,
    },

    /// Enabled methods changed
    RecoveryMethodChanged {
        /// Vault
        vault: KeyId,
        /// Methods before
        previous: RecoveryMethod,
        /// Methods after
        current: RecoveryMethod,
        /// Timestamp (ms since epoch)
        changed_at_ms: u64,
    },

    /// Vault owner replaced by a recovery
    OwnershipTransferred {
        /// Vault
        vault: KeyId,
        /// Owner before
        previous_owner: Address,
        /// Owner after
        new_owner: Address,
        /// Epoch after the transfer
        ownership_epoch: u64,
        /// Timestamp (ms since epoch)
        transferred_at_ms: u64,
    },
}

impl RecoveryFact {
    /// Get the sub-type string for this fact variant
    pub fn sub_type(&self) -> &'static str {
        match self {
            RecoveryFact::ShamirConfigured { .. } => "shamir-configured",
            RecoveryFact::ShareStored { .. } => "share-stored",
            RecoveryFact::ShareRevoked { .. } => "share-revoked",
            RecoveryFact::RecoveryInitiated { .. } => "recovery-initiated",
            RecoveryFact::ShareSubmitted { .. } => "share-submitted",
            RecoveryFact::SessionCompleted { .. } => "session-completed",
            RecoveryFact::RecoveryCompleted { .. } => "recovery-completed",
            RecoveryFact::SocialConfigured { .. } => "social-configured",
            RecoveryFact::GuardianAdded { .. } => "guardian-added",
            RecoveryFact::GuardianRemoved { .. } => "guardian-removed",
            RecoveryFact::ProposalCreated { .. } => "proposal-created",
            RecoveryFact::VoteCast { .. } => "vote-cast",
            RecoveryFact::ProposalExecuted { .. } => "proposal-executed",
            RecoveryFact::ProposalRejected { .. } => "proposal-rejected",
            RecoveryFact::VaultRegistered { .. } => "vault-registered",
            RecoveryFact::RecoveryMethodChanged { .. } => "recovery-method-changed",
            RecoveryFact::OwnershipTransferred { .. } => "ownership-transferred",
        }
    }

    /// Journal tag, `recovery:<sub-type>`
    pub fn fact_type(&self) -> String {
        format!("{RECOVERY_FACT_TYPE_ID}:{}", self.sub_type())
    }

    /// Vault the fact belongs to
    pub fn vault(&self) -> &KeyId {
        match self {
            RecoveryFact::ShamirConfigured { vault, .. }
            | RecoveryFact::ShareStored { vault, .. }
            | RecoveryFact::ShareRevoked { vault, .. }
            | RecoveryFact::RecoveryInitiated { vault, .. }
            | RecoveryFact::ShareSubmitted { vault, .. }
            | RecoveryFact::SessionCompleted { vault, .. }
            | RecoveryFact::RecoveryCompleted { vault, .. }
            | RecoveryFact::SocialConfigured { vault, .. }
            | RecoveryFact::GuardianAdded { vault, .. }
            | RecoveryFact::GuardianRemoved { vault, .. }
            | RecoveryFact::ProposalCreated { vault, .. }
            | RecoveryFact::VoteCast { vault, .. }
            | RecoveryFact::ProposalExecuted { vault, .. }
            | RecoveryFact::ProposalRejected { vault, .. }
            | RecoveryFact::VaultRegistered { vault, .. }
            | RecoveryFact::RecoveryMethodChanged { vault, .. }
            | RecoveryFact::OwnershipTransferred { vault, .. } => vault,
        }
    }

    /// Journal event for the record at `key`
    pub fn to_event(&self, key: &str) -> KeyhavenResult<PendingEvent> {
        PendingEvent::json(self.fact_type(), key, self)
    }
}
