//! Storage domain types

use keyhaven_core::{Address, Hash32, KeyId, KeyhavenError, KeyhavenResult, StorageSettings};
use serde::{Deserialize, Serialize};

/// Highest reputation score
pub const MAX_REPUTATION: u8 = 100;

/// A storage provider known to the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageProvider {
    /// Provider account
    pub address: Address,
    /// Reputation, `0..=100`
    pub reputation_score: u8,
    /// Live deals currently held
    pub active_deal_count: u32,
    /// Inactive providers are never selected and their replicas do not count
    pub is_active: bool,
    /// Quoted price per deal
    pub price: u64,
}

impl StorageProvider {
    /// Active provider with no deals
    pub fn new(address: Address, reputation_score: u8, price: u64) -> KeyhavenResult<Self> {
        if address.is_zero() {
            return Err(KeyhavenError::invalid("provider address is zero"));
        }
        if reputation_score > MAX_REPUTATION {
            return Err(KeyhavenError::invalid(format!(
                "reputation {reputation_score} exceeds {MAX_REPUTATION}"
            )));
        }
        Ok(Self {
            address,
            reputation_score,
            active_deal_count: 0,
            is_active: true,
            price,
        })
    }
}

/// Lifecycle of a deal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DealStatus {
    /// Upload in flight
    Pending,
    /// Provider accepted the payload
    Active,
    /// Deal ended without renewal
    Expired,
    /// Upload failed
    Failed,
    /// Deal was extended
    Renewed,
}

impl DealStatus {
    /// Whether the provider currently holds the data
    pub fn is_live(&self) -> bool {
        matches!(self, DealStatus::Active | DealStatus::Renewed)
    }
}

/// One replica of one piece of data with one provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDeal {
    /// Vault the data belongs to
    pub owner: KeyId,
    /// Storing provider
    pub provider: Address,
    /// Provider content id; empty until active
    pub data_cid: String,
    /// Provider deal id; empty until active
    pub deal_id: String,
    /// Start of the deal
    pub start_epoch_ms: u64,
    /// End of the deal
    pub end_epoch_ms: u64,
    /// Agreed price
    pub price: u64,
    /// Logical data the replica belongs to
    pub data_hash: Hash32,
    /// Current status
    pub status: DealStatus,
    /// Last upload failure, if any
    pub failure: Option<String>,
}

impl StorageDeal {
    /// Fresh pending deal
    pub fn pending(owner: KeyId, provider: Address, data_hash: Hash32, now_ms: u64) -> Self {
        Self {
            owner,
            provider,
            data_cid: String::new(),
            deal_id: String::new(),
            start_epoch_ms: now_ms,
            end_epoch_ms: now_ms,
            price: 0,
            data_hash,
            status: DealStatus::Pending,
            failure: None,
        }
    }
}

/// Replica bounds and renewal window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedundancyConfig {
    /// Minimum live replicas
    pub min_replicas: usize,
    /// Maximum replicas per distribution
    pub max_replicas: usize,
    /// Deals ending within this window are renewed
    pub renewal_window_ms: u64,
}

impl RedundancyConfig {
    /// Check `0 < min <= max`; the provider bound is checked per distribution
    pub fn validate(&self) -> KeyhavenResult<()> {
        if self.min_replicas == 0 {
            return Err(KeyhavenError::invalid("min_replicas must be positive"));
        }
        if self.min_replicas > self.max_replicas {
            return Err(KeyhavenError::invalid(format!(
                "min_replicas {} exceeds max_replicas {}",
                self.min_replicas, self.max_replicas
            )));
        }
        Ok(())
    }
}

impl From<&StorageSettings> for RedundancyConfig {
    fn from(settings: &StorageSettings) -> Self {
        Self {
            min_replicas: settings.min_replicas,
            max_replicas: settings.max_replicas,
            renewal_window_ms: settings.renewal_window_ms,
        }
    }
}

/// Payload destined for one provider
#[derive(Clone, PartialEq, Eq)]
pub struct Assignment {
    /// Receiving provider
    pub provider: Address,
    /// Bytes to upload
    pub payload: Vec<u8>,
}

impl std::fmt::Debug for Assignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assignment")
            .field("provider", &self.provider)
            .field("len", &self.payload.len())
            .finish()
    }
}

/// A set of uploads that together replicate one piece of data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionRequest {
    /// Vault the data belongs to
    pub owner: KeyId,
    /// Logical data id the replicas count toward
    pub data_hash: Hash32,
    /// One payload per provider
    pub assignments: Vec<Assignment>,
}

impl DistributionRequest {
    /// Distinct payloads (e.g. shares) grouped under `data_hash`
    pub fn new(owner: KeyId, data_hash: Hash32, assignments: Vec<Assignment>) -> Self {
        Self {
            owner,
            data_hash,
            assignments,
        }
    }

    /// The same payload to every provider, grouped under its own hash
    pub fn replicated(owner: KeyId, payload: &[u8], providers: &[Address]) -> Self {
        Self {
            owner,
            data_hash: Hash32::of(payload),
            assignments: providers
                .iter()
                .map(|provider| Assignment {
                    provider: *provider,
                    payload: payload.to_vec(),
                })
                .collect(),
        }
    }

    /// Only the assignments for `providers`
    pub fn restricted_to(&self, providers: &[Address]) -> Self {
        Self {
            owner: self.owner.clone(),
            data_hash: self.data_hash,
            assignments: self
                .assignments
                .iter()
                .filter(|a| providers.contains(&a.provider))
                .cloned()
                .collect(),
        }
    }
}

/// Outcome of one distribution attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionReport {
    /// Logical data id
    pub data_hash: Hash32,
    /// Deals activated by this attempt
    pub deals: Vec<StorageDeal>,
    /// Providers whose upload failed, with the reason
    pub failures: Vec<(Address, String)>,
    /// Live replicas on active providers after the attempt
    pub success_count: usize,
    /// Minimum the attempt was measured against
    pub min_replicas: usize,
    /// `success_count >= min_replicas`
    pub redundancy_met: bool,
}

impl DistributionReport {
    /// Providers that need a retry
    pub fn missing_providers(&self) -> Vec<Address> {
        self.failures.iter().map(|(p, _)| *p).collect()
    }

    /// Convert a shortfall into [`KeyhavenError::RedundancyNotMet`]
    pub fn ensure_redundancy(self) -> KeyhavenResult<Self> {
        if self.redundancy_met {
            Ok(self)
        } else {
            Err(KeyhavenError::redundancy_not_met(
                self.success_count,
                self.min_replicas,
                self.failures.iter().map(|(p, _)| p.to_string()).collect(),
            ))
        }
    }
}

/// Outcome of a renewal sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenewalReport {
    /// Deals now `Renewed`
    pub renewed: Vec<StorageDeal>,
    /// `(provider, deal_id, reason)` for renewals that failed
    pub failed: Vec<(Address, String, String)>,
}
