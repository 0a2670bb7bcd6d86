//! Storage distribution coordinator
//!
//! Owns the provider registry and every deal record. A distribution runs in three
//! steps:
//!
//! 1. one transaction records a `Pending` deal per assignment
//! 2. uploads run concurrently, each under the upload timeout; a failure or timeout
//!    affects only its own provider
//! 3. one transaction promotes accepted uploads to `Active` and marks the rest `Failed`
//!
//! The live replica count is then taken from the ledger, so it includes replicas from
//! earlier attempts.

use crate::effects::StorageEffects;
use crate::facts::StorageFact;
use crate::replication::ReplicationTracker;
use crate::selection;
use crate::types::{
    Assignment, DealStatus, DistributionReport, DistributionRequest, RedundancyConfig,
    RenewalReport, StorageDeal, StorageProvider, MAX_REPUTATION,
};
use futures::future::join_all;
use keyhaven_core::{
    load_record, load_records, Address, ConditionalWrite, Hash32, KeyhavenError, KeyhavenResult,
    StorageSettings, Transaction, TransportError, Versioned,
};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

const PROVIDER_PREFIX: &str = "storage:provider:";
const DEAL_PREFIX: &str = "storage:deal:";

fn provider_key(address: &Address) -> String {
    format!("{PROVIDER_PREFIX}{address}")
}

fn deal_prefix(data_hash: &Hash32) -> String {
    format!("{DEAL_PREFIX}{}:", data_hash.to_hex())
}

fn deal_key(data_hash: &Hash32, provider: &Address) -> String {
    format!("{}{provider}", deal_prefix(data_hash))
}

/// Distributes payloads to storage providers and manages the resulting deals
pub struct StorageCoordinator<E> {
    effects: E,
    settings: StorageSettings,
}

impl<E: StorageEffects> StorageCoordinator<E> {
    /// Create a coordinator; replica bounds must satisfy `0 < min <= max`
    pub fn new(effects: E, settings: StorageSettings) -> KeyhavenResult<Self> {
        RedundancyConfig::from(&settings).validate()?;
        Ok(Self { effects, settings })
    }

    /// Replica bounds in force
    pub fn redundancy(&self) -> RedundancyConfig {
        RedundancyConfig::from(&self.settings)
    }

    /// The effect handler
    pub fn effects(&self) -> &E {
        &self.effects
    }

    async fn now(&self) -> KeyhavenResult<u64> {
        Ok(self.effects.physical_time().await?.ts_ms)
    }

    // ------------------------------------------------------------------
    // Provider registry
    // ------------------------------------------------------------------

    /// Add a provider
    pub async fn register_provider(&self, provider: StorageProvider) -> KeyhavenResult<()> {
        if provider.address.is_zero() {
            return Err(KeyhavenError::invalid("provider address is zero"));
        }
        if provider.reputation_score > MAX_REPUTATION {
            return Err(KeyhavenError::invalid(format!(
                "reputation {} exceeds {MAX_REPUTATION}",
                provider.reputation_score
            )));
        }
        let key = provider_key(&provider.address);
        if self.effects.read(&key).await?.is_some() {
            return Err(KeyhavenError::already_configured(format!(
                "provider {}",
                provider.address
            )));
        }

        let now = self.now().await?;
        let fact = StorageFact::ProviderRegistered {
            provider: provider.address,
            reputation_score: provider.reputation_score,
            price: provider.price,
            registered_at_ms: now,
        };
        let tx = Transaction::new(now)
            .write(ConditionalWrite::insert(&key, &provider)?)
            .event(fact.to_event(&key)?);
        self.effects.commit(tx).await?;

        tracing::info!(
            provider = %provider.address,
            reputation = provider.reputation_score,
            price = provider.price,
            "storage provider registered"
        );
        Ok(())
    }

    /// Activate or deactivate a provider
    pub async fn set_provider_active(
        &self,
        address: &Address,
        is_active: bool,
    ) -> KeyhavenResult<StorageProvider> {
        let now = self.now().await?;
        let key = provider_key(address);
        let mut current = self.load_provider(address).await?;
        current.value.is_active = is_active;

        let fact = StorageFact::ProviderStatusChanged {
            provider: *address,
            is_active,
            changed_at_ms: now,
        };
        let tx = Transaction::new(now)
            .write(ConditionalWrite::update(&key, current.version, &current.value)?)
            .event(fact.to_event(&key)?);
        self.effects.commit(tx).await?;

        tracing::info!(provider = %address, is_active, "storage provider status changed");
        Ok(current.value)
    }

    /// Set a provider's reputation, `0..=100`
    pub async fn update_reputation(
        &self,
        address: &Address,
        reputation_score: u8,
    ) -> KeyhavenResult<StorageProvider> {
        if reputation_score > MAX_REPUTATION {
            return Err(KeyhavenError::invalid(format!(
                "reputation {reputation_score} exceeds {MAX_REPUTATION}"
            )));
        }
        let now = self.now().await?;
        let key = provider_key(address);
        let mut current = self.load_provider(address).await?;
        current.value.reputation_score = reputation_score;

        let fact = StorageFact::ReputationUpdated {
            provider: *address,
            reputation_score,
            updated_at_ms: now,
        };
        let tx = Transaction::new(now)
            .write(ConditionalWrite::update(&key, current.version, &current.value)?)
            .event(fact.to_event(&key)?);
        self.effects.commit(tx).await?;

        tracing::debug!(provider = %address, reputation_score, "provider reputation updated");
        Ok(current.value)
    }

    /// One provider
    pub async fn provider(&self, address: &Address) -> KeyhavenResult<Option<StorageProvider>> {
        Ok(load_record::<StorageProvider, _>(&self.effects, &provider_key(address))
            .await?
            .map(|v| v.value))
    }

    /// Every registered provider, ordered by address
    pub async fn providers(&self) -> KeyhavenResult<Vec<StorageProvider>> {
        Ok(load_records::<StorageProvider, _>(&self.effects, PROVIDER_PREFIX)
            .await?
            .into_iter()
            .map(|v| v.value)
            .collect())
    }

    /// [`selection::select_providers`] over the registry
    pub async fn select_providers(
        &self,
        exclude: &[Address],
        count: usize,
    ) -> KeyhavenResult<Vec<StorageProvider>> {
        let all = self.providers().await?;
        selection::select_providers(&all, exclude, count)
    }

    async fn load_provider(&self, address: &Address) -> KeyhavenResult<Versioned<StorageProvider>> {
        load_record(&self.effects, &provider_key(address))
            .await?
            .ok_or_else(|| KeyhavenError::not_found(format!("provider {address}")))
    }

    async fn provider_map(&self) -> KeyhavenResult<HashMap<Address, Versioned<StorageProvider>>> {
        Ok(load_records::<StorageProvider, _>(&self.effects, PROVIDER_PREFIX)
            .await?
            .into_iter()
            .map(|v| (v.value.address, v))
            .collect())
    }

    // ------------------------------------------------------------------
    // Distribution
    // ------------------------------------------------------------------

    /// Upload every assignment and require `min_replicas` live replicas afterwards
    ///
    /// Fails with [`KeyhavenError::RedundancyNotMet`] on a shortfall. Deals that did
    /// activate stay recorded, so [`Self::retry_missing`] only has to cover the
    /// failed providers.
    pub async fn distribute(&self, request: &DistributionRequest) -> KeyhavenResult<DistributionReport> {
        self.attempt_distribution(request).await?.ensure_redundancy()
    }

    /// Like [`Self::distribute`] but reports a shortfall instead of failing
    pub async fn attempt_distribution(
        &self,
        request: &DistributionRequest,
    ) -> KeyhavenResult<DistributionReport> {
        let bounds = self.redundancy();
        let count = request.assignments.len();
        if count < bounds.min_replicas || count > bounds.max_replicas {
            return Err(KeyhavenError::invalid(format!(
                "{count} assignments outside {}..={} replicas",
                bounds.min_replicas, bounds.max_replicas
            )));
        }
        self.run_uploads(request).await
    }

    /// Re-upload only the assignments for `missing`
    pub async fn retry_missing(
        &self,
        request: &DistributionRequest,
        missing: &[Address],
    ) -> KeyhavenResult<DistributionReport> {
        let retry = request.restricted_to(missing);
        if retry.assignments.is_empty() {
            return Err(KeyhavenError::invalid(
                "none of the missing providers has an assignment",
            ));
        }
        tracing::info!(
            data_hash = %request.data_hash,
            providers = retry.assignments.len(),
            "retrying missing replicas"
        );
        self.run_uploads(&retry).await?.ensure_redundancy()
    }

    async fn run_uploads(&self, request: &DistributionRequest) -> KeyhavenResult<DistributionReport> {
        let bounds = self.redundancy();
        let providers = self.provider_map().await?;

        let active_count = providers.values().filter(|p| p.value.is_active).count();
        if active_count < bounds.min_replicas {
            return Err(KeyhavenError::insufficient_providers(
                active_count,
                bounds.min_replicas,
            ));
        }
        let mut seen = HashSet::new();
        for assignment in &request.assignments {
            if !seen.insert(assignment.provider) {
                return Err(KeyhavenError::invalid(format!(
                    "provider {} assigned twice",
                    assignment.provider
                )));
            }
            match providers.get(&assignment.provider) {
                None => {
                    return Err(KeyhavenError::not_found(format!(
                        "provider {}",
                        assignment.provider
                    )))
                }
                Some(p) if !p.value.is_active => {
                    return Err(KeyhavenError::invalid(format!(
                        "provider {} is inactive",
                        assignment.provider
                    )))
                }
                Some(_) => {}
            }
        }

        let now = self.now().await?;
        let existing: HashMap<Address, Versioned<StorageDeal>> = self
            .load_deals(&request.data_hash)
            .await?
            .into_iter()
            .map(|d| (d.value.provider, d))
            .collect();

        // Step 1: pending records
        let mut pending_tx = Transaction::new(now);
        let mut to_upload: Vec<&Assignment> = Vec::new();
        for assignment in &request.assignments {
            let key = deal_key(&request.data_hash, &assignment.provider);
            let deal = StorageDeal::pending(
                request.owner.clone(),
                assignment.provider,
                request.data_hash,
                now,
            );
            let write = match existing.get(&assignment.provider) {
                Some(current) if current.value.status.is_live() => {
                    tracing::debug!(
                        provider = %assignment.provider,
                        data_hash = %request.data_hash,
                        "provider already holds a live replica"
                    );
                    continue;
                }
                Some(current) => ConditionalWrite::update(&key, current.version, &deal)?,
                None => ConditionalWrite::insert(&key, &deal)?,
            };
            pending_tx.push_write(write);
            pending_tx.push_event(
                StorageFact::DealPending {
                    data_hash: request.data_hash,
                    provider: assignment.provider,
                    started_at_ms: now,
                }
                .to_event(&key)?,
            );
            to_upload.push(assignment);
        }
        let pending_versions = if to_upload.is_empty() {
            Vec::new()
        } else {
            self.effects.commit(pending_tx).await?.versions
        };

        // Step 2: concurrent uploads
        let timeout_ms = self.settings.upload_timeout_ms;
        let timeout = Duration::from_millis(timeout_ms);
        let outcomes = join_all(to_upload.iter().map(|assignment| async move {
            let result =
                match tokio::time::timeout(timeout, self.effects.upload(&assignment.provider, &assignment.payload))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::Timeout {
                        provider: assignment.provider,
                        timeout_ms,
                    }),
                };
            (assignment.provider, result)
        }))
        .await;

        // Step 3: activate or fail
        let mut providers = self.provider_map().await?;
        let mut final_tx = Transaction::new(now);
        let mut activated = Vec::new();
        let mut failures = Vec::new();
        let mut touched_providers = Vec::new();
        for ((provider, result), version) in outcomes.into_iter().zip(pending_versions) {
            let key = deal_key(&request.data_hash, &provider);
            let mut deal = StorageDeal::pending(request.owner.clone(), provider, request.data_hash, now);
            match result {
                Ok(receipt) => {
                    deal.data_cid = receipt.data_cid;
                    deal.deal_id = receipt.deal_id;
                    deal.price = receipt.price;
                    deal.end_epoch_ms = now.saturating_add(receipt.duration_ms);
                    deal.status = DealStatus::Active;
                    final_tx.push_event(StorageFact::activated(&deal).to_event(&key)?);
                    if let Some(record) = providers.get_mut(&provider) {
                        record.value.active_deal_count += 1;
                        touched_providers.push(provider);
                    }
                    tracing::debug!(
                        provider = %provider,
                        deal_id = %deal.deal_id,
                        "upload accepted"
                    );
                    activated.push(deal.clone());
                }
                Err(err) => {
                    let reason = err.to_string();
                    tracing::warn!(provider = %provider, error = %reason, "upload failed");
                    deal.status = DealStatus::Failed;
                    deal.failure = Some(reason.clone());
                    final_tx.push_event(
                        StorageFact::DealFailed {
                            data_hash: request.data_hash,
                            provider,
                            reason: reason.clone(),
                        }
                        .to_event(&key)?,
                    );
                    failures.push((provider, reason));
                }
            }
            final_tx.push_write(ConditionalWrite::update(&key, version, &deal)?);
        }
        for provider in touched_providers {
            if let Some(record) = providers.get(&provider) {
                final_tx.push_write(ConditionalWrite::update(
                    provider_key(&provider),
                    record.version,
                    &record.value,
                )?);
            }
        }
        if !final_tx.writes.is_empty() {
            self.effects.commit(final_tx).await?;
        }

        let success_count = self.live_replica_count(&request.data_hash).await?;
        let redundancy_met = success_count >= bounds.min_replicas;
        if redundancy_met {
            tracing::info!(
                data_hash = %request.data_hash,
                success_count,
                failed = failures.len(),
                "distribution met redundancy"
            );
        } else {
            tracing::warn!(
                data_hash = %request.data_hash,
                success_count,
                required = bounds.min_replicas,
                failed = failures.len(),
                "distribution below redundancy"
            );
        }

        Ok(DistributionReport {
            data_hash: request.data_hash,
            deals: activated,
            failures,
            success_count,
            min_replicas: bounds.min_replicas,
            redundancy_met,
        })
    }

    // ------------------------------------------------------------------
    // Deal lifecycle
    // ------------------------------------------------------------------

    /// Renew `Active` deals ending within the renewal window
    ///
    /// Renewals are independent. A refused renewal is reported and leaves its deal
    /// unchanged.
    pub async fn renew_expiring(&self) -> KeyhavenResult<RenewalReport> {
        let now = self.now().await?;
        let horizon = now.saturating_add(self.settings.renewal_window_ms);
        let extension = self.settings.renewal_extension_ms;
        let candidates: Vec<Versioned<StorageDeal>> = self
            .all_deals()
            .await?
            .into_iter()
            .filter(|d| d.value.status == DealStatus::Active && d.value.end_epoch_ms <= horizon)
            .collect();

        let timeout_ms = self.settings.upload_timeout_ms;
        let timeout = Duration::from_millis(timeout_ms);
        let outcomes = join_all(candidates.iter().map(|deal| async move {
            let new_end = deal.value.end_epoch_ms.saturating_add(extension);
            let result = match tokio::time::timeout(
                timeout,
                self.effects
                    .renew(&deal.value.provider, &deal.value.deal_id, new_end),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout {
                    provider: deal.value.provider,
                    timeout_ms,
                }),
            };
            (new_end, result)
        }))
        .await;

        let mut report = RenewalReport::default();
        for (current, (new_end, result)) in candidates.into_iter().zip(outcomes) {
            let key = deal_key(&current.value.data_hash, &current.value.provider);
            let mut deal = current.value;
            match result {
                Ok(()) => {
                    deal.status = DealStatus::Renewed;
                    deal.end_epoch_ms = new_end;
                    let fact = StorageFact::DealRenewed {
                        data_hash: deal.data_hash,
                        provider: deal.provider,
                        deal_id: deal.deal_id.clone(),
                        end_epoch_ms: new_end,
                    };
                    let tx = Transaction::new(now)
                        .write(ConditionalWrite::update(&key, current.version, &deal)?)
                        .event(fact.to_event(&key)?);
                    match self.effects.commit(tx).await {
                        Ok(_) => {
                            tracing::debug!(deal_id = %deal.deal_id, new_end, "deal renewed");
                            report.renewed.push(deal);
                        }
                        Err(err) => {
                            tracing::warn!(deal_id = %deal.deal_id, error = %err, "renewal not recorded");
                            report.failed.push((deal.provider, deal.deal_id, err.to_string()));
                        }
                    }
                }
                Err(err) => {
                    let reason = err.to_string();
                    tracing::warn!(deal_id = %deal.deal_id, error = %reason, "deal renewal failed");
                    let fact = StorageFact::DealRenewalFailed {
                        data_hash: deal.data_hash,
                        provider: deal.provider,
                        deal_id: deal.deal_id.clone(),
                        reason: reason.clone(),
                    };
                    if let Err(err) = self
                        .effects
                        .commit(Transaction::new(now).event(fact.to_event(&key)?))
                        .await
                    {
                        tracing::warn!(deal_id = %deal.deal_id, error = %err, "renewal failure not journaled");
                    }
                    report.failed.push((deal.provider, deal.deal_id, reason));
                }
            }
        }

        tracing::info!(
            renewed = report.renewed.len(),
            failed = report.failed.len(),
            "renewal sweep finished"
        );
        Ok(report)
    }

    /// Mark live deals whose end has passed as `Expired`
    pub async fn expire_deals(&self) -> KeyhavenResult<Vec<StorageDeal>> {
        let now = self.now().await?;
        let mut providers = self.provider_map().await?;
        let mut tx = Transaction::new(now);
        let mut expired = Vec::new();
        let mut touched = HashSet::new();

        for current in self.all_deals().await? {
            if !current.value.status.is_live() || current.value.end_epoch_ms >= now {
                continue;
            }
            let key = deal_key(&current.value.data_hash, &current.value.provider);
            let mut deal = current.value;
            deal.status = DealStatus::Expired;
            tx.push_write(ConditionalWrite::update(&key, current.version, &deal)?);
            tx.push_event(
                StorageFact::DealExpired {
                    data_hash: deal.data_hash,
                    provider: deal.provider,
                    deal_id: deal.deal_id.clone(),
                }
                .to_event(&key)?,
            );
            if let Some(record) = providers.get_mut(&deal.provider) {
                record.value.active_deal_count = record.value.active_deal_count.saturating_sub(1);
                touched.insert(deal.provider);
            }
            expired.push(deal);
        }
        for provider in touched {
            if let Some(record) = providers.get(&provider) {
                tx.push_write(ConditionalWrite::update(
                    provider_key(&provider),
                    record.version,
                    &record.value,
                )?);
            }
        }
        if !tx.writes.is_empty() {
            self.effects.commit(tx).await?;
            tracing::info!(expired = expired.len(), "deals expired");
        }
        Ok(expired)
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// Whether `data_hash` has at least `min_replicas` live replicas on active providers
    pub async fn is_redundancy_met(
        &self,
        data_hash: &Hash32,
        min_replicas: usize,
    ) -> KeyhavenResult<bool> {
        Ok(self.live_replica_count(data_hash).await? >= min_replicas)
    }

    /// Every deal for `data_hash`
    pub async fn deals(&self, data_hash: &Hash32) -> KeyhavenResult<Vec<StorageDeal>> {
        Ok(self
            .load_deals(data_hash)
            .await?
            .into_iter()
            .map(|v| v.value)
            .collect())
    }

    /// Replica index for `data_hash`
    pub async fn tracker(&self, data_hash: &Hash32) -> KeyhavenResult<ReplicationTracker> {
        Ok(ReplicationTracker::from_deals(self.deals(data_hash).await?))
    }

    async fn live_replica_count(&self, data_hash: &Hash32) -> KeyhavenResult<usize> {
        let active: HashSet<Address> = self
            .providers()
            .await?
            .into_iter()
            .filter(|p| p.is_active)
            .map(|p| p.address)
            .collect();
        Ok(self.tracker(data_hash).await?.live_replicas(data_hash, &active))
    }

    async fn load_deals(&self, data_hash: &Hash32) -> KeyhavenResult<Vec<Versioned<StorageDeal>>> {
        load_records(&self.effects, &deal_prefix(data_hash)).await
    }

    async fn all_deals(&self) -> KeyhavenResult<Vec<Versioned<StorageDeal>>> {
        load_records(&self.effects, DEAL_PREFIX).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use keyhaven_core::KeyId;
    use keyhaven_testkit::{address, TestEffects};

    fn settings(min: usize, max: usize) -> StorageSettings {
        StorageSettings {
            min_replicas: min,
            max_replicas: max,
            ..StorageSettings::default()
        }
    }

    async fn coordinator_with(n: u32, min: usize, max: usize) -> StorageCoordinator<TestEffects> {
        let coordinator = StorageCoordinator::new(TestEffects::new(1, 1_000), settings(min, max)).unwrap();
        for i in 1..=n {
            coordinator
                .register_provider(StorageProvider::new(address(i), 50, 1).unwrap())
                .await
                .unwrap();
        }
        coordinator
    }

    fn request(providers: &[Address]) -> DistributionRequest {
        DistributionRequest::replicated(KeyId::new("v1"), b"ciphertext", providers)
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let coordinator = coordinator_with(1, 1, 1).await;
        assert_matches!(
            coordinator
                .register_provider(StorageProvider::new(address(1), 10, 1).unwrap())
                .await,
            Err(KeyhavenError::AlreadyConfigured { .. })
        );
    }

    #[tokio::test]
    async fn assignment_count_must_fit_bounds() {
        let coordinator = coordinator_with(5, 3, 4).await;
        let too_few = request(&[address(1), address(2)]);
        assert_matches!(
            coordinator.distribute(&too_few).await,
            Err(KeyhavenError::InvalidParameters { .. })
        );
        let too_many = request(&[address(1), address(2), address(3), address(4), address(5)]);
        assert_matches!(
            coordinator.distribute(&too_many).await,
            Err(KeyhavenError::InvalidParameters { .. })
        );
    }

    #[tokio::test]
    async fn unknown_and_inactive_providers_are_rejected() {
        let coordinator = coordinator_with(4, 2, 4).await;
        assert_matches!(
            coordinator.distribute(&request(&[address(1), address(9)])).await,
            Err(KeyhavenError::NotFound { .. })
        );
        coordinator.set_provider_active(&address(2), false).await.unwrap();
        assert_matches!(
            coordinator.distribute(&request(&[address(1), address(2)])).await,
            Err(KeyhavenError::InvalidParameters { .. })
        );
    }

    #[tokio::test]
    async fn activation_updates_provider_deal_counts() {
        let coordinator = coordinator_with(3, 2, 3).await;
        coordinator
            .distribute(&request(&[address(1), address(2)]))
            .await
            .unwrap();
        let p1 = coordinator.provider(&address(1)).await.unwrap().unwrap();
        let p3 = coordinator.provider(&address(3)).await.unwrap().unwrap();
        assert_eq!(p1.active_deal_count, 1);
        assert_eq!(p3.active_deal_count, 0);
    }

    #[tokio::test]
    async fn reputation_is_bounded() {
        let coordinator = coordinator_with(1, 1, 1).await;
        assert_matches!(
            coordinator.update_reputation(&address(1), 101).await,
            Err(KeyhavenError::InvalidParameters { .. })
        );
        let updated = coordinator.update_reputation(&address(1), 100).await.unwrap();
        assert_eq!(updated.reputation_score, 100);
    }
}
