//! Unified error system for Keyhaven
//!
//! Every public operation returns [`KeyhavenResult`]. Each variant names one failure
//! the caller can branch on. [`KeyhavenError::kind`] groups the variants into the
//! coarse categories callers route on: configuration mistakes, integrity (security)
//! events, state preconditions ("too late" vs "bad input"), resource shortfalls,
//! fatal math errors, and infrastructure failures from the ports.

use serde::{Deserialize, Serialize};

/// Coarse classification of a [`KeyhavenError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Invalid parameters, duplicate configuration, unknown entities
    Configuration,
    /// Hash mismatches and corrupted encodings; treated as security events
    Integrity,
    /// Precondition failures on sessions and proposals
    State,
    /// Not enough shares, providers or replicas
    Resource,
    /// Field arithmetic failure; indicates a construction bug
    Math,
    /// Ledger, transport, clock, serialization or config loading failure
    Infrastructure,
}

/// Unified error type for all Keyhaven operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum KeyhavenError {
    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------
    /// Parameters violate a documented invariant
    #[error("Invalid parameters: {message}")]
    InvalidParameters {
        /// Which invariant was violated
        message: String,
    },

    /// One-time configuration was attempted twice
    #[error("Already configured: {message}")]
    AlreadyConfigured {
        /// What was already configured
        message: String,
    },

    /// Operation requires configuration that does not exist
    #[error("Not configured: {message}")]
    NotConfigured {
        /// What configuration is missing
        message: String,
    },

    /// Guardian address is zero, the owner, or already a guardian
    #[error("Invalid guardian: {message}")]
    InvalidGuardian {
        /// Why the guardian was refused
        message: String,
    },

    /// Caller is not an active guardian of the vault
    #[error("Not a guardian: {message}")]
    NotGuardian {
        /// Address that was refused
        message: String,
    },

    /// Requested recovery method is not enabled for the vault
    #[error("Recovery method not enabled: {message}")]
    MethodNotEnabled {
        /// Which method was requested
        message: String,
    },

    /// Referenced entity does not exist
    #[error("Not found: {message}")]
    NotFound {
        /// What was not found
        message: String,
    },

    // ------------------------------------------------------------------
    // Integrity
    // ------------------------------------------------------------------
    /// Submitted data does not match the stored integrity hash
    #[error("Integrity mismatch: {message}")]
    IntegrityMismatch {
        /// Which record failed verification
        message: String,
    },

    /// Portable share encoding is corrupted or malformed
    #[error("Invalid share encoding: {message}")]
    InvalidShareEncoding {
        /// What part of the encoding was rejected
        message: String,
    },

    /// Shares disagree on key, threshold, size or index uniqueness
    #[error("Mismatched shares: {message}")]
    MismatchedShares {
        /// Which property disagreed
        message: String,
    },

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------
    /// Session or proposal deadline has passed
    #[error("Expired: {message}")]
    Expired {
        /// What expired
        message: String,
    },

    /// Session already collected its threshold of shares
    #[error("Already complete: {message}")]
    AlreadyComplete {
        /// Which session
        message: String,
    },

    /// Session has not yet collected its threshold of shares
    #[error("Not complete: {message}")]
    NotComplete {
        /// Which session
        message: String,
    },

    /// Session secret was already reconstructed and applied
    #[error("Already finalized: {message}")]
    AlreadyFinalized {
        /// Which session
        message: String,
    },

    /// Share record is revoked or was never stored
    #[error("Share not active: {message}")]
    ShareNotActive {
        /// Which share
        message: String,
    },

    /// Proposal is no longer active
    #[error("Not active: {message}")]
    NotActive {
        /// Which proposal
        message: String,
    },

    /// Proposal voting deadline has passed
    #[error("Voting closed: {message}")]
    VotingClosed {
        /// Which proposal
        message: String,
    },

    /// Guardian has already voted on this proposal
    #[error("Already voted: {message}")]
    AlreadyVoted {
        /// Which guardian and proposal
        message: String,
    },

    /// Execution attempted before the proposal deadline
    #[error("Timelock active: {message}")]
    TimelockActive {
        /// When the timelock ends
        message: String,
    },

    /// Not enough approvals to execute
    #[error("Quorum not reached: {message}")]
    QuorumNotReached {
        /// Vote tally
        message: String,
    },

    /// Proposal was already executed
    #[error("Already executed: {message}")]
    AlreadyExecuted {
        /// Which proposal
        message: String,
    },

    /// Neither rejection rule applies yet
    #[error("Rejection not permitted: {message}")]
    RejectionNotPermitted {
        /// Vote tally
        message: String,
    },

    /// Vault owner changed after the recovery was proposed
    #[error("Owner changed: {message}")]
    OwnerChanged {
        /// Snapshot vs current owner
        message: String,
    },

    /// Compare-and-set write lost against another writer
    #[error("Concurrent modification: {message}")]
    ConcurrentModification {
        /// Ledger key that conflicted
        message: String,
    },

    // ------------------------------------------------------------------
    // Resource
    // ------------------------------------------------------------------
    /// Fewer shares than the threshold
    #[error("Insufficient shares: have {provided}, need {required}")]
    InsufficientShares {
        /// Shares provided
        provided: usize,
        /// Threshold required
        required: usize,
    },

    /// Fewer eligible providers than requested
    #[error("Insufficient providers: have {available}, need {required}")]
    InsufficientProviders {
        /// Eligible providers
        available: usize,
        /// Providers requested
        required: usize,
    },

    /// Distribution finished with fewer live replicas than required
    #[error("Redundancy not met: {achieved} of {required} replicas, missing {missing:?}")]
    RedundancyNotMet {
        /// Live replicas after the attempt
        achieved: usize,
        /// Minimum replicas required
        required: usize,
        /// Providers whose upload failed, as display strings
        missing: Vec<String>,
    },

    // ------------------------------------------------------------------
    // Math
    // ------------------------------------------------------------------
    /// Division by zero in GF(256)
    #[error("Division by zero in GF(256)")]
    DivisionByZero,

    // ------------------------------------------------------------------
    // Infrastructure
    // ------------------------------------------------------------------
    /// Ledger backend failure
    #[error("Ledger error: {message}")]
    Ledger {
        /// Backend message
        message: String,
    },

    /// Storage transport failure
    #[error("Transport error: {message}")]
    Transport {
        /// Transport message
        message: String,
    },

    /// Clock unavailable
    #[error("Time error: {message}")]
    Time {
        /// Clock message
        message: String,
    },

    /// Record (de)serialization failure
    #[error("Serialization error: {message}")]
    Serialization {
        /// Serializer message
        message: String,
    },

    /// Configuration file could not be loaded
    #[error("Config error: {message}")]
    Config {
        /// Loader message
        message: String,
    },
}

macro_rules! message_ctor {
    ($($(#[$doc:meta])* $name:ident => $variant:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $name(message: impl Into<String>) -> Self {
                Self::$variant {
                    message: message.into(),
                }
            }
        )*
    };
}

impl KeyhavenError {
    message_ctor! {
        /// Create an invalid parameters error
        invalid => InvalidParameters,
        /// Create an already configured error
        already_configured => AlreadyConfigured,
        /// Create a not configured error
        not_configured => NotConfigured,
        /// Create an invalid guardian error
        invalid_guardian => InvalidGuardian,
        /// Create a not guardian error
        not_guardian => NotGuardian,
        /// Create a method not enabled error
        method_not_enabled => MethodNotEnabled,
        /// Create a not found error
        not_found => NotFound,
        /// Create an integrity mismatch error
        integrity_mismatch => IntegrityMismatch,
        /// Create an invalid share encoding error
        invalid_encoding => InvalidShareEncoding,
        /// Create a mismatched shares error
        mismatched_shares => MismatchedShares,
        /// Create an expired error
        expired => Expired,
        /// Create an already complete error
        already_complete => AlreadyComplete,
        /// Create a not complete error
        not_complete => NotComplete,
        /// Create an already finalized error
        already_finalized => AlreadyFinalized,
        /// Create a share not active error
        share_not_active => ShareNotActive,
        /// Create a not active error
        not_active => NotActive,
        /// Create a voting closed error
        voting_closed => VotingClosed,
        /// Create an already voted error
        already_voted => AlreadyVoted,
        /// Create a timelock active error
        timelock_active => TimelockActive,
        /// Create a quorum not reached error
        quorum_not_reached => QuorumNotReached,
        /// Create an already executed error
        already_executed => AlreadyExecuted,
        /// Create a rejection not permitted error
        rejection_not_permitted => RejectionNotPermitted,
        /// Create an owner changed error
        owner_changed => OwnerChanged,
        /// Create a concurrent modification error
        conflict => ConcurrentModification,
        /// Create a ledger error
        ledger => Ledger,
        /// Create a transport error
        transport => Transport,
        /// Create a time error
        time => Time,
        /// Create a serialization error
        serialization => Serialization,
        /// Create a config error
        config => Config,
    }

    /// Create an insufficient shares error
    pub fn insufficient_shares(provided: usize, required: usize) -> Self {
        Self::InsufficientShares { provided, required }
    }

    /// Create an insufficient providers error
    pub fn insufficient_providers(available: usize, required: usize) -> Self {
        Self::InsufficientProviders {
            available,
            required,
        }
    }

    /// Create a redundancy not met error
    pub fn redundancy_not_met(achieved: usize, required: usize, missing: Vec<String>) -> Self {
        Self::RedundancyNotMet {
            achieved,
            required,
            missing,
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        use KeyhavenError::*;
        match self {
            InvalidParameters { .. }
            | AlreadyConfigured { .. }
            | NotConfigured { .. }
            | InvalidGuardian { .. }
            | NotGuardian { .. }
            | MethodNotEnabled { .. }
            | NotFound { .. } => ErrorKind::Configuration,
            IntegrityMismatch { .. } | InvalidShareEncoding { .. } | MismatchedShares { .. } => {
                ErrorKind::Integrity
            }
            Expired { .. }
            | AlreadyComplete { .. }
            | NotComplete { .. }
            | AlreadyFinalized { .. }
            | ShareNotActive { .. }
            | NotActive { .. }
            | VotingClosed { .. }
            | AlreadyVoted { .. }
            | TimelockActive { .. }
            | QuorumNotReached { .. }
            | AlreadyExecuted { .. }
            | RejectionNotPermitted { .. }
            | OwnerChanged { .. }
            | ConcurrentModification { .. } => ErrorKind::State,
            InsufficientShares { .. }
            | InsufficientProviders { .. }
            | RedundancyNotMet { .. } => ErrorKind::Resource,
            DivisionByZero => ErrorKind::Math,
            Ledger { .. }
            | Transport { .. }
            | Time { .. }
            | Serialization { .. }
            | Config { .. } => ErrorKind::Infrastructure,
        }
    }

    /// Whether a caller may reasonably retry the same request later.
    ///
    /// Resource shortfalls and transient port failures qualify. Configuration, integrity,
    /// state and math errors never do.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InsufficientProviders { .. }
                | Self::RedundancyNotMet { .. }
                | Self::ConcurrentModification { .. }
                | Self::Ledger { .. }
                | Self::Transport { .. }
                | Self::Time { .. }
        )
    }

    /// Whether this error should be surfaced as a security event.
    pub fn is_security_event(&self) -> bool {
        self.kind() == ErrorKind::Integrity
    }
}

/// Standard Result type for Keyhaven operations
pub type KeyhavenResult<T> = std::result::Result<T, KeyhavenError>;

impl From<serde_json::Error> for KeyhavenError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<toml::de::Error> for KeyhavenError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<std::io::Error> for KeyhavenError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(err.to_string()),
            _ => Self::config(err.to_string()),
        }
    }
}
