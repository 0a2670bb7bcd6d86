//! Shamir recovery sessions
//!
//! A vault is configured once with `(M, N)`. Share locations are recorded per index
//! and can be revoked, which invalidates the share for every session, open or future.
//! A session collects share payloads until `M` distinct valid shares are present, then
//! yields the secret exactly once.
//!
//! ```text
//! initiate ──> Open ──submit x M──> Complete ──reconstruct──> Finalized
//!               │
//!               └── now > deadline: submissions refused (Expired)
//! ```
//!
//! Sessions never hold the secret, only share payloads.

use crate::effects::RecoveryEffects;
use crate::facts::RecoveryFact;
use crate::keys;
use crate::types::{ShamirConfig, ShamirRecoverySession, ShareRecord};
use keyhaven_core::{
    load_record, load_records, Address, ConditionalWrite, Hash32, KeyId, KeyhavenError,
    KeyhavenResult, RecoverySettings, SessionId, Transaction, Versioned,
};
use keyhaven_crypto::{reconstruct, SecretShare, ShamirParams, Zeroizing};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A reconstruction ready to commit
pub(crate) struct PreparedFinalize {
    pub(crate) tx: Transaction,
    pub(crate) session: ShamirRecoverySession,
    pub(crate) secret: Zeroizing<Vec<u8>>,
}

/// Shamir configuration, share records and recovery sessions
pub struct ShamirSessions<E> {
    effects: Arc<E>,
    settings: RecoverySettings,
}

impl<E> Clone for ShamirSessions<E> {
    fn clone(&self) -> Self {
        Self {
            effects: Arc::clone(&self.effects),
            settings: self.settings.clone(),
        }
    }
}

impl<E: RecoveryEffects> ShamirSessions<E> {
    /// Sessions over `effects`
    pub fn new(effects: Arc<E>, settings: RecoverySettings) -> Self {
        Self { effects, settings }
    }

    async fn now(&self) -> KeyhavenResult<u64> {
        Ok(self.effects.physical_time().await?.ts_ms)
    }

    /// Fix `(M, N)` for `vault`; allowed once
    pub async fn configure(
        &self,
        vault: &KeyId,
        owner: Address,
        threshold: usize,
        total_shares: usize,
    ) -> KeyhavenResult<ShamirConfig> {
        let now = self.now().await?;
        let (tx, config) = self
            .plan_configure(vault, owner, threshold, total_shares, now)
            .await?;
        self.effects.commit(tx).await?;
        Ok(config)
    }

    pub(crate) async fn plan_configure(
        &self,
        vault: &KeyId,
        owner: Address,
        threshold: usize,
        total_shares: usize,
        now: u64,
    ) -> KeyhavenResult<(Transaction, ShamirConfig)> {
        let params = ShamirParams::new(threshold, total_shares)?;
        if owner.is_zero() {
            return Err(KeyhavenError::invalid("owner address is zero"));
        }
        let key = keys::shamir_config(vault);
        if self.effects.read(&key).await?.is_some() {
            return Err(KeyhavenError::already_configured(format!(
                "shamir recovery for {vault}"
            )));
        }

        let config = ShamirConfig {
            vault: vault.clone(),
            owner,
            threshold: params.threshold(),
            total_shares: params.total_shares(),
            created_at_ms: now,
        };
        let fact = RecoveryFact::ShamirConfigured {
            vault: vault.clone(),
            threshold: config.threshold,
            total_shares: config.total_shares,
            configured_at_ms: now,
        };
        let tx = Transaction::new(now)
            .write(ConditionalWrite::insert(&key, &config)?)
            .event(fact.to_event(&key)?);

        tracing::info!(
            vault = %vault,
            threshold = config.threshold,
            total_shares = config.total_shares,
            "shamir recovery configured"
        );
        Ok((tx, config))
    }

    /// Record where share `index` is held and its payload hash
    ///
    /// An index is stored at most once, even after revocation.
    pub async fn store_share(
        &self,
        vault: &KeyId,
        index: u8,
        storage_locator: impl Into<String>,
        custodian_id: impl Into<String>,
        integrity_hash: Hash32,
    ) -> KeyhavenResult<ShareRecord> {
        let now = self.now().await?;
        let (tx, record) = self
            .plan_store_share(
                vault,
                index,
                storage_locator.into(),
                custodian_id.into(),
                integrity_hash,
                now,
            )
            .await?;
        self.effects.commit(tx).await?;
        Ok(record)
    }

    pub(crate) async fn plan_store_share(
        &self,
        vault: &KeyId,
        index: u8,
        storage_locator: String,
        custodian_id: String,
        integrity_hash: Hash32,
        now: u64,
    ) -> KeyhavenResult<(Transaction, ShareRecord)> {
        let config = self.require_config(vault).await?;
        if index == 0 || index > config.total_shares {
            return Err(KeyhavenError::invalid(format!(
                "share index {index} outside 1..={}",
                config.total_shares
            )));
        }
        let key = keys::share(vault, index);
        if self.effects.read(&key).await?.is_some() {
            return Err(KeyhavenError::invalid(format!(
                "share {index} of {vault} was already stored"
            )));
        }

        let record = ShareRecord {
            vault: vault.clone(),
            index,
            storage_locator,
            custodian_id,
            integrity_hash,
            created_at_ms: now,
            is_active: true,
        };
        let fact = RecoveryFact::ShareStored {
            vault: vault.clone(),
            index,
            custodian_id: record.custodian_id.clone(),
            integrity_hash,
            stored_at_ms: now,
        };
        let tx = Transaction::new(now)
            .write(ConditionalWrite::insert(&key, &record)?)
            .event(fact.to_event(&key)?);

        tracing::debug!(vault = %vault, index, custodian = %record.custodian_id, "share stored");
        Ok((tx, record))
    }

    /// Permanently revoke share `index`
    pub async fn revoke_share(&self, vault: &KeyId, index: u8) -> KeyhavenResult<ShareRecord> {
        let now = self.now().await?;
        let key = keys::share(vault, index);
        let mut current = load_record::<ShareRecord, _>(self.effects.as_ref(), &key)
            .await?
            .ok_or_else(|| KeyhavenError::not_found(format!("share {index} of {vault}")))?;
        if !current.value.is_active {
            return Err(KeyhavenError::share_not_active(format!(
                "share {index} of {vault} is already revoked"
            )));
        }

        current.value.is_active = false;
        let fact = RecoveryFact::ShareRevoked {
            vault: vault.clone(),
            index,
            revoked_at_ms: now,
        };
        let tx = Transaction::new(now)
            .write(ConditionalWrite::update(&key, current.version, &current.value)?)
            .event(fact.to_event(&key)?);
        self.effects.commit(tx).await?;

        tracing::info!(vault = %vault, index, "share revoked");
        Ok(current.value)
    }

    /// Open a session for `initiator`
    pub async fn initiate(
        &self,
        vault: &KeyId,
        initiator: Address,
    ) -> KeyhavenResult<ShamirRecoverySession> {
        let now = self.now().await?;
        let config = self
            .config(vault)
            .await?
            .ok_or_else(|| KeyhavenError::not_configured(format!("shamir recovery for {vault}")))?;
        if initiator.is_zero() {
            return Err(KeyhavenError::invalid("initiator address is zero"));
        }

        let id = SessionId::from_random_bytes(self.effects.random_bytes_16().await);
        let session = ShamirRecoverySession {
            id,
            vault: vault.clone(),
            initiator,
            required_shares: config.threshold,
            submitted: BTreeMap::new(),
            deadline_ms: now.saturating_add(self.settings.shamir_session_ttl_ms),
            created_at_ms: now,
            is_complete: false,
            is_finalized: false,
        };
        let key = keys::session(&id);
        let fact = RecoveryFact::RecoveryInitiated {
            vault: vault.clone(),
            session_id: id,
            initiator,
            deadline_ms: session.deadline_ms,
        };
        let tx = Transaction::new(now)
            .write(ConditionalWrite::insert(&key, &session)?)
            .event(fact.to_event(&key)?);
        self.effects.commit(tx).await?;

        tracing::info!(
            vault = %vault,
            session = %id,
            initiator = %initiator,
            deadline_ms = session.deadline_ms,
            "shamir recovery initiated"
        );
        Ok(session)
    }

    /// Add share `index` to a session
    ///
    /// Checks run in order: expiry, completion, share status, payload hash. Submitting
    /// an index again replaces the earlier payload.
    pub async fn submit_share(
        &self,
        session_id: &SessionId,
        index: u8,
        payload: &[u8],
    ) -> KeyhavenResult<ShamirRecoverySession> {
        let now = self.now().await?;
        let key = keys::session(session_id);
        let mut current = self.load_session(session_id).await?;
        let session = &mut current.value;

        if session.is_expired(now) {
            return Err(KeyhavenError::expired(format!(
                "{session_id} closed at {}",
                session.deadline_ms
            )));
        }
        if session.is_complete {
            return Err(KeyhavenError::already_complete(session_id.to_string()));
        }
        let record = match self.share_record(&session.vault, index).await? {
            Some(record) if record.is_active => record,
            _ => {
                return Err(KeyhavenError::share_not_active(format!(
                    "share {index} of {}",
                    session.vault
                )))
            }
        };
        if integrity_hash(payload) != record.integrity_hash {
            tracing::warn!(
                vault = %session.vault,
                session = %session_id,
                index,
                "share payload failed integrity check"
            );
            return Err(KeyhavenError::integrity_mismatch(format!(
                "share {index} of {}",
                session.vault
            )));
        }

        session.submitted.insert(index, payload.to_vec());
        let submitted_count = session.submitted.len() as u8;
        let mut tx = Transaction::new(now).event(
            RecoveryFact::ShareSubmitted {
                vault: session.vault.clone(),
                session_id: *session_id,
                index,
                submitted_count,
                submitted_at_ms: now,
            }
            .to_event(&key)?,
        );
        if submitted_count >= session.required_shares {
            session.is_complete = true;
            tx.push_event(
                RecoveryFact::SessionCompleted {
                    vault: session.vault.clone(),
                    session_id: *session_id,
                    completed_at_ms: now,
                }
                .to_event(&key)?,
            );
        }
        tx.push_write(ConditionalWrite::update(&key, current.version, &current.value)?);
        self.effects.commit(tx).await?;

        tracing::debug!(
            session = %session_id,
            index,
            submitted = submitted_count,
            required = current.value.required_shares,
            complete = current.value.is_complete,
            "share submitted"
        );
        Ok(current.value)
    }

    /// Reconstruct the secret from a complete, unexpired session and finalize it
    pub async fn reconstruct(&self, session_id: &SessionId) -> KeyhavenResult<Zeroizing<Vec<u8>>> {
        let now = self.now().await?;
        let prepared = self.plan_finalize(session_id, now).await?;
        self.effects.commit(prepared.tx).await?;
        Ok(prepared.secret)
    }

    pub(crate) async fn plan_finalize(
        &self,
        session_id: &SessionId,
        now: u64,
    ) -> KeyhavenResult<PreparedFinalize> {
        let key = keys::session(session_id);
        let mut current = self.load_session(session_id).await?;
        if current.value.is_finalized {
            return Err(KeyhavenError::already_finalized(session_id.to_string()));
        }
        if current.value.is_expired(now) {
            return Err(KeyhavenError::expired(format!(
                "{session_id} closed at {}",
                current.value.deadline_ms
            )));
        }
        if !current.value.is_complete {
            return Err(KeyhavenError::not_complete(format!(
                "{session_id} has {} of {} shares",
                current.value.submitted.len(),
                current.value.required_shares
            )));
        }

        let vault = current.value.vault.clone();
        let config = self.require_config(&vault).await?;
        let records: BTreeMap<u8, ShareRecord> = self
            .share_records(&vault)
            .await?
            .into_iter()
            .map(|r| (r.index, r))
            .collect();

        // Shares revoked since submission no longer count
        let shares = current
            .value
            .submitted
            .iter()
            .filter(|(index, payload)| {
                records
                    .get(*index)
                    .is_some_and(|r| r.is_active && r.integrity_hash == integrity_hash(payload))
            })
            .map(|(index, payload)| {
                SecretShare::from_parts(
                    *index,
                    payload.clone(),
                    config.threshold,
                    config.total_shares,
                    vault.clone(),
                    config.created_at_ms,
                )
            })
            .collect::<KeyhavenResult<Vec<_>>>()?;
        let required = current.value.required_shares as usize;
        if shares.len() < required {
            return Err(KeyhavenError::insufficient_shares(shares.len(), required));
        }
        let secret = reconstruct(&shares)?;

        current.value.is_finalized = true;
        let fact = RecoveryFact::RecoveryCompleted {
            vault: vault.clone(),
            session_id: *session_id,
            completed_at_ms: now,
        };
        let tx = Transaction::new(now)
            .write(ConditionalWrite::update(&key, current.version, &current.value)?)
            .event(fact.to_event(&key)?);

        tracing::info!(vault = %vault, session = %session_id, shares = shares.len(), "secret reconstructed");
        Ok(PreparedFinalize {
            tx,
            session: current.value,
            secret,
        })
    }

    /// One session
    pub async fn session(&self, id: &SessionId) -> KeyhavenResult<Option<ShamirRecoverySession>> {
        Ok(load_record(self.effects.as_ref(), &keys::session(id))
            .await?
            .map(|v: Versioned<ShamirRecoverySession>| v.value))
    }

    /// A vault's configuration
    pub async fn config(&self, vault: &KeyId) -> KeyhavenResult<Option<ShamirConfig>> {
        Ok(load_record(self.effects.as_ref(), &keys::shamir_config(vault))
            .await?
            .map(|v: Versioned<ShamirConfig>| v.value))
    }

    /// One share record
    pub async fn share_record(&self, vault: &KeyId, index: u8) -> KeyhavenResult<Option<ShareRecord>> {
        Ok(load_record(self.effects.as_ref(), &keys::share(vault, index))
            .await?
            .map(|v: Versioned<ShareRecord>| v.value))
    }

    /// All share records of a vault, by index
    pub async fn share_records(&self, vault: &KeyId) -> KeyhavenResult<Vec<ShareRecord>> {
        Ok(load_records(self.effects.as_ref(), &keys::share_prefix(vault))
            .await?
            .into_iter()
            .map(|v: Versioned<ShareRecord>| v.value)
            .collect())
    }

    async fn require_config(&self, vault: &KeyId) -> KeyhavenResult<ShamirConfig> {
        self.config(vault)
            .await?
            .ok_or_else(|| KeyhavenError::not_configured(format!("shamir recovery for {vault}")))
    }

    async fn load_session(&self, id: &SessionId) -> KeyhavenResult<Versioned<ShamirRecoverySession>> {
        load_record(self.effects.as_ref(), &keys::session(id))
            .await?
            .ok_or_else(|| KeyhavenError::not_found(id.to_string()))
    }
}

/// SHA-256 of a share payload, as stored in its [`ShareRecord`]
pub fn integrity_hash(payload: &[u8]) -> Hash32 {
    Hash32::of(payload)
}
