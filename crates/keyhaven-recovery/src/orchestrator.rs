//! Recovery orchestrator
//!
//! Owns the vault record and is the only writer of its `owner` field. Every mutation
//! for a vault runs under that vault's lock, and every ownership change commits in the
//! same ledger transaction as the session or proposal transition that justifies it,
//! so an outcome can never be applied twice.

use crate::effects::RecoveryStorageEffects;
use crate::facts::RecoveryFact;
use crate::guardian_session::GuardianSessions;
use crate::keys;
use crate::locks::VaultLocks;
use crate::shamir_session::{integrity_hash, ShamirSessions};
use crate::types::{
    BackupReceipt, Guardian, OwnershipTransfer, RecoveryHandle, RecoveryInitiation,
    RecoveryMethod, RecoveryProposal, ShamirRecoveryOutcome, ShamirRecoverySession, ShareRecord,
    VaultRecord, VoteChoice,
};
use keyhaven_core::{
    crypto::hash::hash_parts, load_record, Address, ConditionalWrite, Hash32, KeyId,
    KeyhavenConfig, KeyhavenError, KeyhavenResult, ProposalId, SessionId, Transaction, Versioned,
};
use keyhaven_crypto::{decode_share, encode_share, split, Zeroizing};
use keyhaven_store::{Assignment, DistributionRequest, StorageCoordinator};
use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-vault coordination of both recovery paths
pub struct RecoveryOrchestrator<E> {
    effects: Arc<E>,
    shamir: ShamirSessions<E>,
    guardians: GuardianSessions<E>,
    storage: StorageCoordinator<Arc<E>>,
    locks: VaultLocks,
}

impl<E: RecoveryStorageEffects> RecoveryOrchestrator<E> {
    /// Build the orchestrator and its components from a validated configuration
    pub fn new(effects: Arc<E>, config: &KeyhavenConfig) -> KeyhavenResult<Self> {
        config.validate()?;
        Ok(Self {
            shamir: ShamirSessions::new(Arc::clone(&effects), config.recovery.clone()),
            guardians: GuardianSessions::new(Arc::clone(&effects), config.recovery.clone()),
            storage: StorageCoordinator::new(Arc::clone(&effects), config.storage.clone())?,
            locks: VaultLocks::new(),
            effects,
        })
    }

    /// Shamir component, for views
    pub fn shamir(&self) -> &ShamirSessions<E> {
        &self.shamir
    }

    /// Guardian component, for views
    pub fn guardians(&self) -> &GuardianSessions<E> {
        &self.guardians
    }

    /// Storage coordinator, for provider management and deal sweeps
    pub fn storage(&self) -> &StorageCoordinator<Arc<E>> {
        &self.storage
    }

    async fn now(&self) -> KeyhavenResult<u64> {
        Ok(self.effects.physical_time().await?.ts_ms)
    }

    // ------------------------------------------------------------------
    // Vault setup
    // ------------------------------------------------------------------

    /// Register `key_id` with no recovery method
    pub async fn register_vault(&self, key_id: &KeyId, owner: Address) -> KeyhavenResult<VaultRecord> {
        if key_id.is_empty() {
            return Err(KeyhavenError::invalid("vault id is empty"));
        }
        if owner.is_zero() {
            return Err(KeyhavenError::invalid("owner address is zero"));
        }
        let _guard = self.locks.lock(key_id).await;
        let now = self.now().await?;
        let key = keys::vault(key_id);
        if self.effects.read(&key).await?.is_some() {
            return Err(KeyhavenError::already_configured(format!("vault {key_id}")));
        }

        let record = VaultRecord {
            key_id: key_id.clone(),
            owner,
            method: RecoveryMethod::None,
            ownership_epoch: 0,
            created_at_ms: now,
            updated_at_ms: now,
        };
        let fact = RecoveryFact::VaultRegistered {
            vault: key_id.clone(),
            owner,
            registered_at_ms: now,
        };
        let tx = Transaction::new(now)
            .write(ConditionalWrite::insert(&key, &record)?)
            .event(fact.to_event(&key)?);
        self.effects.commit(tx).await?;

        tracing::info!(vault = %key_id, owner = %owner, "vault registered");
        Ok(record)
    }

    /// Configure Shamir recovery and add it to the vault's methods
    ///
    /// `total_shares` must fit the storage replica bounds, since each share is backed
    /// up to its own provider.
    pub async fn enable_shamir(
        &self,
        key_id: &KeyId,
        threshold: usize,
        total_shares: usize,
    ) -> KeyhavenResult<VaultRecord> {
        let bounds = self.storage.redundancy();
        if total_shares < bounds.min_replicas || total_shares > bounds.max_replicas {
            return Err(KeyhavenError::invalid(format!(
                "{total_shares} shares cannot be backed up to {}..={} providers",
                bounds.min_replicas, bounds.max_replicas
            )));
        }
        let _guard = self.locks.lock(key_id).await;
        let now = self.now().await?;
        let vault = self.load_vault(key_id).await?;
        let (mut tx, _) = self
            .shamir
            .plan_configure(key_id, vault.value.owner, threshold, total_shares, now)
            .await?;
        let (promote, record) = Self::plan_promotion(vault, RecoveryMethod::Shamir, now)?;
        tx.extend(promote);
        self.effects.commit(tx).await?;
        Ok(record)
    }

    /// Configure guardian recovery and add it to the vault's methods
    pub async fn enable_social(
        &self,
        key_id: &KeyId,
        required_approvals: u32,
        recovery_delay_ms: u64,
    ) -> KeyhavenResult<VaultRecord> {
        let _guard = self.locks.lock(key_id).await;
        let now = self.now().await?;
        let vault = self.load_vault(key_id).await?;
        let (mut tx, _) = self
            .guardians
            .plan_configure(key_id, required_approvals, recovery_delay_ms, now)
            .await?;
        let (promote, record) = Self::plan_promotion(vault, RecoveryMethod::Social, now)?;
        tx.extend(promote);
        self.effects.commit(tx).await?;
        Ok(record)
    }

    fn plan_promotion(
        mut vault: Versioned<VaultRecord>,
        added: RecoveryMethod,
        now: u64,
    ) -> KeyhavenResult<(Transaction, VaultRecord)> {
        let key = keys::vault(&vault.value.key_id);
        let previous = vault.value.method;
        let current = previous.with(added);
        let mut tx = Transaction::new(now);
        if current != previous {
            vault.value.method = current;
            vault.value.updated_at_ms = now;
            tx.push_write(ConditionalWrite::update(&key, vault.version, &vault.value)?);
            tx.push_event(
                RecoveryFact::RecoveryMethodChanged {
                    vault: vault.value.key_id.clone(),
                    previous,
                    current,
                    changed_at_ms: now,
                }
                .to_event(&key)?,
            );
            tracing::info!(
                vault = %vault.value.key_id,
                ?previous,
                ?current,
                "recovery method changed"
            );
        }
        Ok((tx, vault.value))
    }

    /// Add a guardian for the vault's current owner
    pub async fn add_guardian(
        &self,
        key_id: &KeyId,
        guardian: Address,
        encrypted_share: Vec<u8>,
        storage_locator: impl Into<String>,
    ) -> KeyhavenResult<Guardian> {
        let _guard = self.locks.lock(key_id).await;
        let vault = self.load_vault(key_id).await?.value;
        self.guardians
            .add_guardian(key_id, vault.owner, guardian, encrypted_share, storage_locator)
            .await
    }

    /// Remove a guardian
    pub async fn remove_guardian(&self, key_id: &KeyId, guardian: &Address) -> KeyhavenResult<Guardian> {
        let _guard = self.locks.lock(key_id).await;
        self.load_vault(key_id).await?;
        self.guardians.remove_guardian(key_id, guardian).await
    }

    // ------------------------------------------------------------------
    // Backup
    // ------------------------------------------------------------------

    /// Split `secret` with the vault's `(M, N)` and store share `i` with the `i`-th
    /// selected provider
    ///
    /// Share records are written only when at least `M` shares and the replica
    /// minimum were delivered; otherwise nothing is recorded and the call fails with
    /// [`KeyhavenError::RedundancyNotMet`], leaving every index free for a new backup.
    pub async fn backup_secret(
        &self,
        key_id: &KeyId,
        secret: &[u8],
        exclude: &[Address],
    ) -> KeyhavenResult<BackupReceipt> {
        let _guard = self.locks.lock(key_id).await;
        let vault = self.load_vault(key_id).await?.value;
        Self::require_method(&vault, RecoveryMethod::Shamir)?;
        let config = self
            .shamir
            .config(key_id)
            .await?
            .ok_or_else(|| KeyhavenError::not_configured(format!("shamir recovery for {key_id}")))?;
        // Indices are write-once
        let stored = self.shamir.share_records(key_id).await?;
        if !stored.is_empty() {
            return Err(KeyhavenError::invalid(format!(
                "{key_id} already holds {} share records",
                stored.len()
            )));
        }
        let now = self.now().await?;

        let seed = Zeroizing::new(self.effects.random_bytes_32().await);
        let mut rng = ChaCha20Rng::from_seed(*seed);
        let shares = split(
            secret,
            config.threshold as usize,
            config.total_shares as usize,
            key_id,
            now,
            &mut rng,
        )?;

        let providers = self
            .storage
            .select_providers(exclude, shares.len())
            .await?;
        let mut index_of = HashMap::with_capacity(shares.len());
        let mut assignments = Vec::with_capacity(shares.len());
        let mut payload_hashes = Vec::with_capacity(shares.len());
        for (share, provider) in shares.iter().zip(&providers) {
            let encoded = encode_share(share)?.into_bytes();
            payload_hashes.push(integrity_hash(share.payload()));
            index_of.insert(provider.address, share.index());
            assignments.push(Assignment {
                provider: provider.address,
                payload: encoded,
            });
        }
        let parts: Vec<&[u8]> = payload_hashes.iter().map(|h| h.as_bytes().as_slice()).collect();
        let data_hash = Hash32::from(hash_parts(&parts));
        let request = DistributionRequest::new(key_id.clone(), data_hash, assignments);

        let report = self.storage.attempt_distribution(&request).await?;
        let mut missing_indices: Vec<u8> = report
            .missing_providers()
            .iter()
            .filter_map(|p| index_of.get(p).copied())
            .collect();
        missing_indices.sort_unstable();

        let delivered = report.deals.len();
        let required = config.threshold as usize;
        if !report.redundancy_met {
            return Err(report.ensure_redundancy().err().unwrap_or_else(|| {
                KeyhavenError::redundancy_not_met(delivered, required, Vec::new())
            }));
        }
        if delivered < required {
            return Err(KeyhavenError::redundancy_not_met(
                delivered,
                required,
                report.missing_providers().iter().map(|p| p.to_string()).collect(),
            ));
        }

        let mut tx = Transaction::new(now);
        let mut stored_indices = Vec::with_capacity(delivered);
        for deal in &report.deals {
            let Some(&index) = index_of.get(&deal.provider) else {
                continue;
            };
            let Some(share) = shares.iter().find(|s| s.index() == index) else {
                continue;
            };
            let (share_tx, record) = self
                .shamir
                .plan_store_share(
                    key_id,
                    index,
                    deal.data_cid.clone(),
                    deal.provider.to_string(),
                    integrity_hash(share.payload()),
                    now,
                )
                .await?;
            tx.extend(share_tx);
            stored_indices.push(record.index);
        }
        self.effects.commit(tx).await?;
        stored_indices.sort_unstable();

        tracing::info!(
            vault = %key_id,
            stored = stored_indices.len(),
            missing = missing_indices.len(),
            "secret backed up"
        );
        Ok(BackupReceipt {
            data_hash,
            stored_indices,
            missing_indices,
            deals: report.deals,
        })
    }

    /// Revoke a share for every session of the vault
    pub async fn revoke_share(&self, key_id: &KeyId, index: u8) -> KeyhavenResult<ShareRecord> {
        let _guard = self.locks.lock(key_id).await;
        self.shamir.revoke_share(key_id, index).await
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    /// Start a recovery through an enabled method
    pub async fn initiate_recovery(
        &self,
        key_id: &KeyId,
        initiation: RecoveryInitiation,
    ) -> KeyhavenResult<RecoveryHandle> {
        let _guard = self.locks.lock(key_id).await;
        let vault = self.load_vault(key_id).await?.value;
        match initiation {
            RecoveryInitiation::Shamir { initiator } => {
                Self::require_method(&vault, RecoveryMethod::Shamir)?;
                let session = self.shamir.initiate(key_id, initiator).await?;
                Ok(RecoveryHandle::Shamir(session.id))
            }
            RecoveryInitiation::Social {
                proposer,
                new_owner,
            } => {
                Self::require_method(&vault, RecoveryMethod::Social)?;
                let proposal = self
                    .guardians
                    .propose(key_id, vault.owner, proposer, new_owner)
                    .await?;
                Ok(RecoveryHandle::Social(proposal.id))
            }
        }
    }

    /// Submit a share payload to a session of this vault
    pub async fn submit_share(
        &self,
        key_id: &KeyId,
        session: &SessionId,
        index: u8,
        payload: &[u8],
    ) -> KeyhavenResult<ShamirRecoverySession> {
        let _guard = self.locks.lock(key_id).await;
        self.require_session(key_id, session).await?;
        self.shamir.submit_share(session, index, payload).await
    }

    /// Decode a share in its portable form and submit it
    pub async fn submit_encoded_share(
        &self,
        key_id: &KeyId,
        session: &SessionId,
        encoded: &str,
    ) -> KeyhavenResult<ShamirRecoverySession> {
        let share = decode_share(encoded).map_err(|err| {
            tracing::warn!(vault = %key_id, session = %session, "undecodable share submitted");
            err
        })?;
        if share.key_id() != key_id {
            return Err(KeyhavenError::mismatched_shares(format!(
                "share belongs to {}, not {key_id}",
                share.key_id()
            )));
        }
        self.submit_share(key_id, session, share.index(), share.payload())
            .await
    }

    /// Vote on a proposal of this vault
    pub async fn cast_vote(
        &self,
        key_id: &KeyId,
        proposal: &ProposalId,
        guardian: Address,
        choice: VoteChoice,
    ) -> KeyhavenResult<RecoveryProposal> {
        let _guard = self.locks.lock(key_id).await;
        self.require_proposal(key_id, proposal).await?;
        self.guardians.vote(proposal, guardian, choice).await
    }

    /// Reject a proposal of this vault
    pub async fn reject_social_recovery(
        &self,
        key_id: &KeyId,
        proposal: &ProposalId,
    ) -> KeyhavenResult<RecoveryProposal> {
        let _guard = self.locks.lock(key_id).await;
        self.require_proposal(key_id, proposal).await?;
        self.guardians.reject(proposal).await
    }

    /// Reconstruct the secret and, when the initiator is not the owner, hand the vault
    /// to the initiator in the same transaction
    pub async fn complete_shamir_recovery(
        &self,
        key_id: &KeyId,
        session: &SessionId,
    ) -> KeyhavenResult<ShamirRecoveryOutcome> {
        let _guard = self.locks.lock(key_id).await;
        self.require_session(key_id, session).await?;
        let now = self.now().await?;
        let mut vault = self.load_vault(key_id).await?;

        let prepared = self.shamir.plan_finalize(session, now).await?;
        let mut tx = prepared.tx;
        let initiator = prepared.session.initiator;
        let transfer = if initiator != vault.value.owner {
            let (transfer_tx, transfer) = Self::plan_transfer(&mut vault, initiator, now)?;
            tx.extend(transfer_tx);
            if let Some(retire) = self.guardians.plan_retire(key_id, &initiator, now).await? {
                tx.extend(retire);
            }
            Some(transfer)
        } else {
            None
        };
        self.effects.commit(tx).await?;

        tracing::info!(
            vault = %key_id,
            session = %session,
            ownership_changed = transfer.is_some(),
            "shamir recovery completed"
        );
        Ok(ShamirRecoveryOutcome {
            secret: prepared.secret,
            transfer,
        })
    }

    /// Execute a proposal and move the vault to its new owner in the same transaction
    pub async fn execute_social_recovery(
        &self,
        key_id: &KeyId,
        proposal: &ProposalId,
    ) -> KeyhavenResult<OwnershipTransfer> {
        let _guard = self.locks.lock(key_id).await;
        self.require_proposal(key_id, proposal).await?;
        let now = self.now().await?;
        let mut vault = self.load_vault(key_id).await?;

        let (mut tx, certified) = self.guardians.plan_execute(proposal, now).await?;
        if certified.current_owner != vault.value.owner {
            return Err(KeyhavenError::owner_changed(format!(
                "{key_id} moved from {} to {} since {proposal}",
                certified.current_owner, vault.value.owner
            )));
        }
        let (transfer_tx, transfer) = Self::plan_transfer(&mut vault, certified.new_owner, now)?;
        tx.extend(transfer_tx);
        // An owner cannot guard their own vault
        if let Some(retire) = self
            .guardians
            .plan_retire(key_id, &certified.new_owner, now)
            .await?
        {
            tx.extend(retire);
        }
        self.effects.commit(tx).await?;

        tracing::info!(vault = %key_id, proposal = %proposal, new_owner = %transfer.new_owner, "social recovery executed");
        Ok(transfer)
    }

    fn plan_transfer(
        vault: &mut Versioned<VaultRecord>,
        new_owner: Address,
        now: u64,
    ) -> KeyhavenResult<(Transaction, OwnershipTransfer)> {
        let key = keys::vault(&vault.value.key_id);
        let previous_owner = vault.value.owner;
        vault.value.owner = new_owner;
        vault.value.ownership_epoch += 1;
        vault.value.updated_at_ms = now;

        let transfer = OwnershipTransfer {
            key_id: vault.value.key_id.clone(),
            previous_owner,
            new_owner,
            ownership_epoch: vault.value.ownership_epoch,
            transferred_at_ms: now,
        };
        let fact = RecoveryFact::OwnershipTransferred {
            vault: vault.value.key_id.clone(),
            previous_owner,
            new_owner,
            ownership_epoch: transfer.ownership_epoch,
            transferred_at_ms: now,
        };
        let tx = Transaction::new(now)
            .write(ConditionalWrite::update(&key, vault.version, &vault.value)?)
            .event(fact.to_event(&key)?);
        Ok((tx, transfer))
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// One vault
    pub async fn vault(&self, key_id: &KeyId) -> KeyhavenResult<Option<VaultRecord>> {
        Ok(load_record(self.effects.as_ref(), &keys::vault(key_id))
            .await?
            .map(|v: Versioned<VaultRecord>| v.value))
    }

    async fn load_vault(&self, key_id: &KeyId) -> KeyhavenResult<Versioned<VaultRecord>> {
        load_record(self.effects.as_ref(), &keys::vault(key_id))
            .await?
            .ok_or_else(|| KeyhavenError::not_found(format!("vault {key_id}")))
    }

    fn require_method(vault: &VaultRecord, method: RecoveryMethod) -> KeyhavenResult<()> {
        if vault.method.includes(method) {
            Ok(())
        } else {
            Err(KeyhavenError::method_not_enabled(format!(
                "{method:?} recovery for {}",
                vault.key_id
            )))
        }
    }

    async fn require_session(&self, key_id: &KeyId, session: &SessionId) -> KeyhavenResult<()> {
        match self.shamir.session(session).await? {
            Some(s) if &s.vault == key_id => Ok(()),
            _ => Err(KeyhavenError::not_found(format!("{session} of {key_id}"))),
        }
    }

    async fn require_proposal(&self, key_id: &KeyId, proposal: &ProposalId) -> KeyhavenResult<()> {
        match self.guardians.proposal(proposal).await? {
            Some(p) if &p.vault == key_id => Ok(()),
            _ => Err(KeyhavenError::not_found(format!("{proposal} of {key_id}"))),
        }
    }
}
