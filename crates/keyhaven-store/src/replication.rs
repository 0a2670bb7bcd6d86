//! Replica tracking
//!
//! Indexes deals by data hash and by provider. The tracker is rebuilt from the
//! ledger's deal records whenever the coordinator needs it, so it never drifts from
//! persisted state.

use crate::types::{DealStatus, StorageDeal};
use keyhaven_core::{Address, Hash32};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Replica counts for one data hash
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationStats {
    /// Deals of any status
    pub total_replicas: usize,
    /// `Active` deals
    pub active: usize,
    /// `Renewed` deals
    pub renewed: usize,
    /// `Pending` deals
    pub pending: usize,
    /// `Failed` deals
    pub failed: usize,
    /// `Expired` deals
    pub expired: usize,
}

impl ReplicationStats {
    /// `Active` plus `Renewed`, regardless of provider status
    pub fn live(&self) -> usize {
        self.active + self.renewed
    }
}

/// Deal index by data hash and by provider
#[derive(Debug, Clone, Default)]
pub struct ReplicationTracker {
    deals: BTreeMap<(Hash32, Address), StorageDeal>,
    data_replicas: BTreeMap<Hash32, BTreeSet<Address>>,
    provider_data: BTreeMap<Address, BTreeSet<Hash32>>,
}

impl ReplicationTracker {
    /// Empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker over `deals`
    pub fn from_deals(deals: impl IntoIterator<Item = StorageDeal>) -> Self {
        let mut tracker = Self::new();
        for deal in deals {
            tracker.track(deal);
        }
        tracker
    }

    /// Insert or replace the deal for `(data_hash, provider)`
    pub fn track(&mut self, deal: StorageDeal) {
        self.data_replicas
            .entry(deal.data_hash)
            .or_default()
            .insert(deal.provider);
        self.provider_data
            .entry(deal.provider)
            .or_default()
            .insert(deal.data_hash);
        self.deals.insert((deal.data_hash, deal.provider), deal);
    }

    /// Deal for `(data_hash, provider)`
    pub fn deal(&self, data_hash: &Hash32, provider: &Address) -> Option<&StorageDeal> {
        self.deals.get(&(*data_hash, *provider))
    }

    /// Providers with any deal for `data_hash`
    pub fn replicas(&self, data_hash: &Hash32) -> Option<&BTreeSet<Address>> {
        self.data_replicas.get(data_hash)
    }

    /// Data hashes with any deal at `provider`
    pub fn provider_data(&self, provider: &Address) -> Option<&BTreeSet<Hash32>> {
        self.provider_data.get(provider)
    }

    /// Live replicas of `data_hash` held by providers in `active_providers`
    pub fn live_replicas(&self, data_hash: &Hash32, active_providers: &HashSet<Address>) -> usize {
        self.deals_for(data_hash)
            .filter(|d| d.status.is_live() && active_providers.contains(&d.provider))
            .count()
    }

    /// Providers whose deal for `data_hash` failed
    pub fn failed_providers(&self, data_hash: &Hash32) -> Vec<Address> {
        self.deals_for(data_hash)
            .filter(|d| d.status == DealStatus::Failed)
            .map(|d| d.provider)
            .collect()
    }

    /// Status counts for `data_hash`
    pub fn stats(&self, data_hash: &Hash32) -> ReplicationStats {
        let mut stats = ReplicationStats::default();
        for deal in self.deals_for(data_hash) {
            stats.total_replicas += 1;
            match deal.status {
                DealStatus::Active => stats.active += 1,
                DealStatus::Renewed => stats.renewed += 1,
                DealStatus::Pending => stats.pending += 1,
                DealStatus::Failed => stats.failed += 1,
                DealStatus::Expired => stats.expired += 1,
            }
        }
        stats
    }

    fn deals_for<'a>(&'a self, data_hash: &'a Hash32) -> impl Iterator<Item = &'a StorageDeal> {
        self.data_replicas
            .get(data_hash)
            .into_iter()
            .flatten()
            .filter_map(move |provider| self.deals.get(&(*data_hash, *provider)))
    }
}
