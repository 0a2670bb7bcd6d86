//! Recovery domain records
//!
//! Everything here is persisted through the ledger as JSON. Records are replaced whole
//! on every transition, so a reader always sees one consistent version.

use keyhaven_core::{Address, Hash32, KeyId, KeyhavenResult, ProposalId, SessionId};
use keyhaven_crypto::{ShamirParams, Zeroizing};
use keyhaven_store::StorageDeal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Shamir path
// ============================================================================

/// Share layout of a vault's key, fixed at configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShamirConfig {
    /// Vault
    pub vault: KeyId,
    /// Owner when configured
    pub owner: Address,
    /// Shares needed to reconstruct (`M`)
    pub threshold: u8,
    /// Shares issued (`N`)
    pub total_shares: u8,
    /// Configuration time
    pub created_at_ms: u64,
}

impl ShamirConfig {
    /// Validated `(M, N)`
    pub fn params(&self) -> KeyhavenResult<ShamirParams> {
        ShamirParams::new(self.threshold as usize, self.total_shares as usize)
    }
}

/// Where one share lives and how to verify it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRecord {
    /// Vault
    pub vault: KeyId,
    /// Share index, `1..=N`
    pub index: u8,
    /// Opaque locator returned by the custodian (e.g. a content id)
    pub storage_locator: String,
    /// Custodian holding the share
    pub custodian_id: String,
    /// SHA-256 of the share payload
    pub integrity_hash: Hash32,
    /// Store time
    pub created_at_ms: u64,
    /// `false` once revoked; revocation is permanent
    pub is_active: bool,
}

/// One attempt to gather `M` shares
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShamirRecoverySession {
    /// Session id
    pub id: SessionId,
    /// Vault
    pub vault: KeyId,
    /// Account that started the session and receives ownership on completion
    pub initiator: Address,
    /// Shares needed (`M` at initiation)
    pub required_shares: u8,
    /// Submitted share payloads by index
    pub submitted: BTreeMap<u8, Vec<u8>>,
    /// Submissions after this instant are refused
    pub deadline_ms: u64,
    /// Initiation time
    pub created_at_ms: u64,
    /// At least `required_shares` distinct shares were submitted
    pub is_complete: bool,
    /// The secret was reconstructed; the session cannot yield it again
    pub is_finalized: bool,
}

impl ShamirRecoverySession {
    /// `now > deadline`
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.deadline_ms
    }

    /// Submitted indices in ascending order
    pub fn submitted_indices(&self) -> Vec<u8> {
        self.submitted.keys().copied().collect()
    }
}

impl fmt::Debug for ShamirRecoverySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShamirRecoverySession")
            .field("id", &self.id)
            .field("vault", &self.vault)
            .field("initiator", &self.initiator)
            .field("required_shares", &self.required_shares)
            .field("submitted", &self.submitted_indices())
            .field("deadline_ms", &self.deadline_ms)
            .field("is_complete", &self.is_complete)
            .field("is_finalized", &self.is_finalized)
            .finish()
    }
}

// ============================================================================
// Social path
// ============================================================================

/// Guardian voting parameters for a vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialConfig {
    /// Vault
    pub vault: KeyId,
    /// "For" votes needed to execute
    pub required_approvals: u32,
    /// Currently active guardians
    pub total_guardians: u32,
    /// Timelock between proposal and execution
    pub recovery_delay_ms: u64,
    /// Set once configured
    pub is_initialized: bool,
    /// Configuration time
    pub created_at_ms: u64,
}

/// A trusted account that can vote on recovery
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guardian {
    /// Vault
    pub vault: KeyId,
    /// Guardian account
    pub address: Address,
    /// Material the guardian holds for the owner, opaque here
    pub encrypted_share: Vec<u8>,
    /// Where the guardian's material is stored
    pub storage_locator: String,
    /// `false` once removed
    pub is_active: bool,
    /// Add time
    pub added_at_ms: u64,
}

impl fmt::Debug for Guardian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guardian")
            .field("vault", &self.vault)
            .field("address", &self.address)
            .field("storage_locator", &self.storage_locator)
            .field("is_active", &self.is_active)
            .field("added_at_ms", &self.added_at_ms)
            .finish_non_exhaustive()
    }
}

/// A guardian's vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteChoice {
    /// Approve the proposal
    For,
    /// Oppose the proposal
    Against,
}

/// An immutable cast vote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    /// Proposal voted on
    pub proposal: ProposalId,
    /// Voter
    pub guardian: Address,
    /// Choice
    pub choice: VoteChoice,
    /// Cast time
    pub cast_at_ms: u64,
}

/// Where a proposal stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProposalStatus {
    /// Open for votes or awaiting execution
    Active,
    /// Executed; ownership moves to the new owner
    Executed,
    /// Closed without execution
    Rejected,
}

/// A proposal to move vault ownership to `new_owner`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryProposal {
    /// Proposal id
    pub id: ProposalId,
    /// Vault
    pub vault: KeyId,
    /// Guardian that proposed
    pub proposer: Address,
    /// Vault owner when proposed
    pub current_owner: Address,
    /// Owner after execution
    pub new_owner: Address,
    /// "For" votes
    pub votes_for: u32,
    /// "Against" votes
    pub votes_against: u32,
    /// End of voting and start of execution
    pub deadline_ms: u64,
    /// Proposal time
    pub created_at_ms: u64,
    /// Executed
    pub is_executed: bool,
    /// Neither executed nor rejected
    pub is_active: bool,
    /// Votes by guardian
    pub votes: BTreeMap<Address, VoteRecord>,
}

impl RecoveryProposal {
    /// Current status
    pub fn status(&self) -> ProposalStatus {
        if self.is_executed {
            ProposalStatus::Executed
        } else if self.is_active {
            ProposalStatus::Active
        } else {
            ProposalStatus::Rejected
        }
    }

    /// Whether `guardian` has voted
    pub fn has_voted(&self, guardian: &Address) -> bool {
        self.votes.contains_key(guardian)
    }
}

// ============================================================================
// Orchestration
// ============================================================================

/// Recovery methods enabled for a vault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecoveryMethod {
    /// Nothing enabled
    None,
    /// Shamir shares only
    Shamir,
    /// Guardians only
    Social,
    /// Both
    Both,
}

impl RecoveryMethod {
    /// Method after also enabling `other`; never loses a method
    pub fn with(self, other: RecoveryMethod) -> Self {
        use RecoveryMethod::*;
        match (self, other) {
            (current, None) => current,
            (None, added) => added,
            (Both, _) | (_, Both) => Both,
            (Shamir, Shamir) => Shamir,
            (Social, Social) => Social,
            (Shamir, Social) | (Social, Shamir) => Both,
        }
    }

    /// Whether `method` is enabled
    pub fn includes(self, method: RecoveryMethod) -> bool {
        self.with(method) == self
    }
}

/// A vault and its current owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRecord {
    /// Vault
    pub key_id: KeyId,
    /// Current owner
    pub owner: Address,
    /// Enabled methods
    pub method: RecoveryMethod,
    /// Incremented on each ownership transfer
    pub ownership_epoch: u64,
    /// Registration time
    pub created_at_ms: u64,
    /// Last change
    pub updated_at_ms: u64,
}

/// How to start a recovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryInitiation {
    /// Gather shares; `initiator` becomes owner on completion
    Shamir {
        /// Requesting account
        initiator: Address,
    },
    /// Ask the guardians to move ownership
    Social {
        /// Proposing guardian
        proposer: Address,
        /// Requested owner
        new_owner: Address,
    },
}

/// Identifier of a started recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryHandle {
    /// Shamir session
    Shamir(SessionId),
    /// Guardian proposal
    Social(ProposalId),
}

/// An applied change of owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipTransfer {
    /// Vault
    pub key_id: KeyId,
    /// Owner before
    pub previous_owner: Address,
    /// Owner after
    pub new_owner: Address,
    /// Ownership epoch after the transfer
    pub ownership_epoch: u64,
    /// Transfer time
    pub transferred_at_ms: u64,
}

/// Result of completing a Shamir recovery
pub struct ShamirRecoveryOutcome {
    /// Reconstructed secret, wiped on drop
    pub secret: Zeroizing<Vec<u8>>,
    /// Set when the initiator was not already the owner
    pub transfer: Option<OwnershipTransfer>,
}

impl fmt::Debug for ShamirRecoveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShamirRecoveryOutcome")
            .field("secret", &"<redacted>")
            .field("transfer", &self.transfer)
            .finish()
    }
}

/// Result of backing up a secret to storage providers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReceipt {
    /// Groups the share deals in the storage coordinator
    pub data_hash: Hash32,
    /// Indices uploaded and recorded
    pub stored_indices: Vec<u8>,
    /// Indices whose upload failed
    pub missing_indices: Vec<u8>,
    /// Deals activated by the backup
    pub deals: Vec<StorageDeal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn method() -> impl Strategy<Value = RecoveryMethod> {
        prop_oneof![
            Just(RecoveryMethod::None),
            Just(RecoveryMethod::Shamir),
            Just(RecoveryMethod::Social),
            Just(RecoveryMethod::Both),
        ]
    }

    proptest! {
        #[test]
        fn enabling_never_drops_a_method(steps in proptest::collection::vec(method(), 0..8)) {
            let mut current = RecoveryMethod::None;
            for step in steps {
                let next = current.with(step);
                prop_assert!(next.includes(current));
                prop_assert!(next.includes(step));
                current = next;
            }
        }
    }

    #[test]
    fn method_promotion_is_monotonic() {
        use RecoveryMethod::*;
        assert_eq!(None.with(Shamir), Shamir);
        assert_eq!(Shamir.with(Social), Both);
        assert_eq!(Social.with(Shamir), Both);
        assert_eq!(Both.with(Shamir), Both);
        assert_eq!(Shamir.with(Shamir), Shamir);
        assert_eq!(Social.with(None), Social);
    }

    #[test]
    fn includes_follows_promotion() {
        use RecoveryMethod::*;
        assert!(Both.includes(Shamir) && Both.includes(Social));
        assert!(Shamir.includes(Shamir) && !Shamir.includes(Social));
        assert!(!None.includes(Social));
    }

    #[test]
    fn session_debug_hides_payloads() {
        let mut submitted = BTreeMap::new();
        submitted.insert(2u8, vec![0xde, 0xad]);
        let session = ShamirRecoverySession {
            id: SessionId::from_random_bytes([1; 16]),
            vault: KeyId::new("v"),
            initiator: Address::from_bytes([1; 20]),
            required_shares: 2,
            submitted,
            deadline_ms: 10,
            created_at_ms: 0,
            is_complete: false,
            is_finalized: false,
        };
        let text = format!("{session:?}");
        assert!(text.contains("submitted: [2]"));
        assert!(!text.contains("222"));
    }
}
