//! Guardian recovery sessions
//!
//! Guardians of a vault vote on proposals to move ownership to a new address. A
//! proposal can only execute once its deadline has passed and enough guardians voted
//! for it, so an early quorum still leaves the owner the full timelock to react.
//!
//! ```text
//! propose ──> Active ──(now >= deadline, votes_for >= required)──> Executed
//!               │
//!               └──(majority against, or deadline passed short of quorum)──> Rejected
//! ```
//!
//! Execution only certifies the outcome. The orchestrator applies the ownership change.

use crate::effects::RecoveryEffects;
use crate::facts::RecoveryFact;
use crate::keys;
use crate::types::{Guardian, RecoveryProposal, SocialConfig, VoteChoice, VoteRecord};
use keyhaven_core::{
    load_record, load_records, Address, ConditionalWrite, KeyId, KeyhavenError, KeyhavenResult,
    ProposalId, RecoverySettings, Transaction, Versioned,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Guardian registry, proposals and votes
pub struct GuardianSessions<E> {
    effects: Arc<E>,
    settings: RecoverySettings,
}

impl<E> Clone for GuardianSessions<E> {
    fn clone(&self) -> Self {
        Self {
            effects: Arc::clone(&self.effects),
            settings: self.settings.clone(),
        }
    }
}

impl<E: RecoveryEffects> GuardianSessions<E> {
    /// Sessions over `effects`
    pub fn new(effects: Arc<E>, settings: RecoverySettings) -> Self {
        Self { effects, settings }
    }

    async fn now(&self) -> KeyhavenResult<u64> {
        Ok(self.effects.physical_time().await?.ts_ms)
    }

    /// Set the approval count and timelock for `vault`; allowed once
    pub async fn configure(
        &self,
        vault: &KeyId,
        required_approvals: u32,
        recovery_delay_ms: u64,
    ) -> KeyhavenResult<SocialConfig> {
        let now = self.now().await?;
        let (tx, config) = self
            .plan_configure(vault, required_approvals, recovery_delay_ms, now)
            .await?;
        self.effects.commit(tx).await?;
        Ok(config)
    }

    pub(crate) async fn plan_configure(
        &self,
        vault: &KeyId,
        required_approvals: u32,
        recovery_delay_ms: u64,
        now: u64,
    ) -> KeyhavenResult<(Transaction, SocialConfig)> {
        if required_approvals == 0 {
            return Err(KeyhavenError::invalid("required_approvals must be at least 1"));
        }
        if recovery_delay_ms < self.settings.min_recovery_delay_ms {
            return Err(KeyhavenError::invalid(format!(
                "recovery delay {recovery_delay_ms}ms is below the minimum of {}ms",
                self.settings.min_recovery_delay_ms
            )));
        }
        let key = keys::social_config(vault);
        if self.effects.read(&key).await?.is_some() {
            return Err(KeyhavenError::already_configured(format!(
                "social recovery for {vault}"
            )));
        }

        let config = SocialConfig {
            vault: vault.clone(),
            required_approvals,
            total_guardians: 0,
            recovery_delay_ms,
            is_initialized: true,
            created_at_ms: now,
        };
        let fact = RecoveryFact::SocialConfigured {
            vault: vault.clone(),
            required_approvals,
            recovery_delay_ms,
            configured_at_ms: now,
        };
        let tx = Transaction::new(now)
            .write(ConditionalWrite::insert(&key, &config)?)
            .event(fact.to_event(&key)?);

        tracing::info!(
            vault = %vault,
            required_approvals,
            recovery_delay_ms,
            "social recovery configured"
        );
        Ok((tx, config))
    }

    /// Add `address` as a guardian of `vault`
    ///
    /// A previously removed guardian can be added again.
    pub async fn add_guardian(
        &self,
        vault: &KeyId,
        owner: Address,
        address: Address,
        encrypted_share: Vec<u8>,
        storage_locator: impl Into<String>,
    ) -> KeyhavenResult<Guardian> {
        let now = self.now().await?;
        let mut config = self.load_config(vault).await?;
        if address.is_zero() {
            return Err(KeyhavenError::invalid_guardian("guardian address is zero"));
        }
        if address == owner {
            return Err(KeyhavenError::invalid_guardian(format!(
                "{address} owns {vault} and cannot guard it"
            )));
        }

        let key = keys::guardian(vault, &address);
        let existing: Option<Versioned<Guardian>> = load_record(self.effects.as_ref(), &key).await?;
        let guardian = Guardian {
            vault: vault.clone(),
            address,
            encrypted_share,
            storage_locator: storage_locator.into(),
            is_active: true,
            added_at_ms: now,
        };
        let write = match existing {
            Some(current) if current.value.is_active => {
                return Err(KeyhavenError::invalid_guardian(format!(
                    "{address} already guards {vault}"
                )))
            }
            Some(current) => ConditionalWrite::update(&key, current.version, &guardian)?,
            None => ConditionalWrite::insert(&key, &guardian)?,
        };

        config.value.total_guardians += 1;
        let config_key = keys::social_config(vault);
        let fact = RecoveryFact::GuardianAdded {
            vault: vault.clone(),
            guardian: address,
            added_at_ms: now,
        };
        let tx = Transaction::new(now)
            .write(write)
            .write(ConditionalWrite::update(&config_key, config.version, &config.value)?)
            .event(fact.to_event(&key)?);
        self.effects.commit(tx).await?;

        tracing::info!(
            vault = %vault,
            guardian = %address,
            total_guardians = config.value.total_guardians,
            "guardian added"
        );
        Ok(guardian)
    }

    /// Deactivate a guardian; votes already cast stay recorded
    pub async fn remove_guardian(&self, vault: &KeyId, address: &Address) -> KeyhavenResult<Guardian> {
        let now = self.now().await?;
        let config = self.load_config(vault).await?;
        let key = keys::guardian(vault, address);
        let current = match load_record::<Guardian, _>(self.effects.as_ref(), &key).await? {
            Some(current) if current.value.is_active => current,
            _ => {
                return Err(KeyhavenError::not_guardian(format!(
                    "{address} does not guard {vault}"
                )))
            }
        };

        let (tx, guardian) = Self::plan_deactivate(config, current, now)?;
        self.effects.commit(tx).await?;

        tracing::info!(vault = %vault, guardian = %address, "guardian removed");
        Ok(guardian)
    }

    /// Deactivation of `address` as it becomes the owner of `vault`
    ///
    /// `None` when the vault has no guardian recovery or `address` is not an active
    /// guardian.
    pub(crate) async fn plan_retire(
        &self,
        vault: &KeyId,
        address: &Address,
        now: u64,
    ) -> KeyhavenResult<Option<Transaction>> {
        let Some(config) =
            load_record::<SocialConfig, _>(self.effects.as_ref(), &keys::social_config(vault)).await?
        else {
            return Ok(None);
        };
        let key = keys::guardian(vault, address);
        match load_record::<Guardian, _>(self.effects.as_ref(), &key).await? {
            Some(current) if current.value.is_active => {
                tracing::info!(vault = %vault, guardian = %address, "guardian retired on becoming owner");
                Ok(Some(Self::plan_deactivate(config, current, now)?.0))
            }
            _ => Ok(None),
        }
    }

    fn plan_deactivate(
        mut config: Versioned<SocialConfig>,
        mut current: Versioned<Guardian>,
        now: u64,
    ) -> KeyhavenResult<(Transaction, Guardian)> {
        let vault = current.value.vault.clone();
        let address = current.value.address;
        let key = keys::guardian(&vault, &address);
        current.value.is_active = false;
        config.value.total_guardians = config.value.total_guardians.saturating_sub(1);
        let fact = RecoveryFact::GuardianRemoved {
            vault: vault.clone(),
            guardian: address,
            removed_at_ms: now,
        };
        let tx = Transaction::new(now)
            .write(ConditionalWrite::update(&key, current.version, &current.value)?)
            .write(ConditionalWrite::update(
                keys::social_config(&vault),
                config.version,
                &config.value,
            )?)
            .event(fact.to_event(&key)?);
        Ok((tx, current.value))
    }

    /// Propose moving `vault` from `current_owner` to `new_owner`
    ///
    /// The proposer's own vote is recorded "for".
    pub async fn propose(
        &self,
        vault: &KeyId,
        current_owner: Address,
        proposer: Address,
        new_owner: Address,
    ) -> KeyhavenResult<RecoveryProposal> {
        let now = self.now().await?;
        let config = self.load_config(vault).await?.value;
        self.require_guardian(vault, &proposer).await?;
        if new_owner.is_zero() {
            return Err(KeyhavenError::invalid("new owner address is zero"));
        }
        if new_owner == current_owner {
            return Err(KeyhavenError::invalid(format!(
                "{new_owner} already owns {vault}"
            )));
        }

        let id = ProposalId::from_random_bytes(self.effects.random_bytes_16().await);
        let vote = VoteRecord {
            proposal: id,
            guardian: proposer,
            choice: VoteChoice::For,
            cast_at_ms: now,
        };
        let proposal = RecoveryProposal {
            id,
            vault: vault.clone(),
            proposer,
            current_owner,
            new_owner,
            votes_for: 1,
            votes_against: 0,
            deadline_ms: now.saturating_add(config.recovery_delay_ms),
            created_at_ms: now,
            is_executed: false,
            is_active: true,
            votes: BTreeMap::from([(proposer, vote.clone())]),
        };

        let key = keys::proposal(&id);
        let created = RecoveryFact::ProposalCreated {
            vault: vault.clone(),
            proposal_id: id,
            proposer,
            new_owner,
            deadline_ms: proposal.deadline_ms,
        };
        let voted = RecoveryFact::VoteCast {
            vault: vault.clone(),
            proposal_id: id,
            guardian: proposer,
            choice: VoteChoice::For,
            cast_at_ms: now,
        };
        let tx = Transaction::new(now)
            .write(ConditionalWrite::insert(&key, &proposal)?)
            .write(ConditionalWrite::insert(keys::vote(&id, &proposer), &vote)?)
            .event(created.to_event(&key)?)
            .event(voted.to_event(&key)?);
        self.effects.commit(tx).await?;

        tracing::info!(
            vault = %vault,
            proposal = %id,
            proposer = %proposer,
            new_owner = %new_owner,
            deadline_ms = proposal.deadline_ms,
            "recovery proposed"
        );
        Ok(proposal)
    }

    /// Record `guardian`'s vote; each guardian votes once
    pub async fn vote(
        &self,
        proposal_id: &ProposalId,
        guardian: Address,
        choice: VoteChoice,
    ) -> KeyhavenResult<RecoveryProposal> {
        let now = self.now().await?;
        let key = keys::proposal(proposal_id);
        let mut current = self.load_proposal(proposal_id).await?;
        if !current.value.is_active {
            return Err(KeyhavenError::not_active(proposal_id.to_string()));
        }
        if now > current.value.deadline_ms {
            return Err(KeyhavenError::voting_closed(format!(
                "{proposal_id} closed at {}",
                current.value.deadline_ms
            )));
        }
        let vault = current.value.vault.clone();
        self.require_guardian(&vault, &guardian).await?;
        if current.value.has_voted(&guardian) {
            return Err(KeyhavenError::already_voted(format!(
                "{guardian} on {proposal_id}"
            )));
        }

        let record = VoteRecord {
            proposal: *proposal_id,
            guardian,
            choice,
            cast_at_ms: now,
        };
        match choice {
            VoteChoice::For => current.value.votes_for += 1,
            VoteChoice::Against => current.value.votes_against += 1,
        }
        current.value.votes.insert(guardian, record.clone());

        let fact = RecoveryFact::VoteCast {
            vault: vault.clone(),
            proposal_id: *proposal_id,
            guardian,
            choice,
            cast_at_ms: now,
        };
        let tx = Transaction::new(now)
            .write(ConditionalWrite::update(&key, current.version, &current.value)?)
            .write(ConditionalWrite::insert(keys::vote(proposal_id, &guardian), &record)?)
            .event(fact.to_event(&key)?);
        self.effects.commit(tx).await?;

        tracing::debug!(
            proposal = %proposal_id,
            guardian = %guardian,
            ?choice,
            votes_for = current.value.votes_for,
            votes_against = current.value.votes_against,
            "vote cast"
        );
        Ok(current.value)
    }

    /// Certify a proposal whose timelock has passed with enough approvals
    pub async fn execute(&self, proposal_id: &ProposalId) -> KeyhavenResult<RecoveryProposal> {
        let now = self.now().await?;
        let (tx, proposal) = self.plan_execute(proposal_id, now).await?;
        self.effects.commit(tx).await?;
        Ok(proposal)
    }

    pub(crate) async fn plan_execute(
        &self,
        proposal_id: &ProposalId,
        now: u64,
    ) -> KeyhavenResult<(Transaction, RecoveryProposal)> {
        let key = keys::proposal(proposal_id);
        let mut current = self.load_proposal(proposal_id).await?;
        if current.value.is_executed {
            return Err(KeyhavenError::already_executed(proposal_id.to_string()));
        }
        if !current.value.is_active {
            return Err(KeyhavenError::not_active(proposal_id.to_string()));
        }
        if now < current.value.deadline_ms {
            return Err(KeyhavenError::timelock_active(format!(
                "{proposal_id} executes from {}",
                current.value.deadline_ms
            )));
        }
        let config = self.load_config(&current.value.vault).await?.value;
        if current.value.votes_for < config.required_approvals {
            return Err(KeyhavenError::quorum_not_reached(format!(
                "{proposal_id} has {} of {} approvals",
                current.value.votes_for, config.required_approvals
            )));
        }

        current.value.is_executed = true;
        current.value.is_active = false;
        let fact = RecoveryFact::ProposalExecuted {
            vault: current.value.vault.clone(),
            proposal_id: *proposal_id,
            executed_at_ms: now,
        };
        let tx = Transaction::new(now)
            .write(ConditionalWrite::update(&key, current.version, &current.value)?)
            .event(fact.to_event(&key)?);

        tracing::info!(
            vault = %current.value.vault,
            proposal = %proposal_id,
            votes_for = current.value.votes_for,
            "recovery proposal executed"
        );
        Ok((tx, current.value))
    }

    /// Close a proposal without executing it
    ///
    /// Permitted when a strict majority of active guardians voted against, or when
    /// the deadline passed short of the required approvals.
    pub async fn reject(&self, proposal_id: &ProposalId) -> KeyhavenResult<RecoveryProposal> {
        let now = self.now().await?;
        let key = keys::proposal(proposal_id);
        let mut current = self.load_proposal(proposal_id).await?;
        if current.value.is_executed {
            return Err(KeyhavenError::already_executed(proposal_id.to_string()));
        }
        if !current.value.is_active {
            return Err(KeyhavenError::not_active(proposal_id.to_string()));
        }

        let config = self.load_config(&current.value.vault).await?.value;
        let majority_against =
            u64::from(current.value.votes_against) * 2 > u64::from(config.total_guardians);
        let lapsed = now >= current.value.deadline_ms
            && current.value.votes_for < config.required_approvals;
        if !majority_against && !lapsed {
            return Err(KeyhavenError::rejection_not_permitted(format!(
                "{proposal_id} has {} against of {} guardians",
                current.value.votes_against, config.total_guardians
            )));
        }

        current.value.is_active = false;
        let fact = RecoveryFact::ProposalRejected {
            vault: current.value.vault.clone(),
            proposal_id: *proposal_id,
            rejected_at_ms: now,
        };
        let tx = Transaction::new(now)
            .write(ConditionalWrite::update(&key, current.version, &current.value)?)
            .event(fact.to_event(&key)?);
        self.effects.commit(tx).await?;

        tracing::info!(
            vault = %current.value.vault,
            proposal = %proposal_id,
            majority_against,
            lapsed,
            "recovery proposal rejected"
        );
        Ok(current.value)
    }

    /// One proposal
    pub async fn proposal(&self, id: &ProposalId) -> KeyhavenResult<Option<RecoveryProposal>> {
        Ok(load_record(self.effects.as_ref(), &keys::proposal(id))
            .await?
            .map(|v: Versioned<RecoveryProposal>| v.value))
    }

    /// A vault's voting configuration
    pub async fn config(&self, vault: &KeyId) -> KeyhavenResult<Option<SocialConfig>> {
        Ok(load_record(self.effects.as_ref(), &keys::social_config(vault))
            .await?
            .map(|v: Versioned<SocialConfig>| v.value))
    }

    /// Active guardians of a vault, ordered by address
    pub async fn guardians(&self, vault: &KeyId) -> KeyhavenResult<Vec<Guardian>> {
        Ok(load_records(self.effects.as_ref(), &keys::guardian_prefix(vault))
            .await?
            .into_iter()
            .map(|v: Versioned<Guardian>| v.value)
            .filter(|g| g.is_active)
            .collect())
    }

    /// Every vote cast on a proposal, in casting order
    pub async fn vote_log(&self, id: &ProposalId) -> KeyhavenResult<Vec<VoteRecord>> {
        let mut votes: Vec<VoteRecord> = load_records(self.effects.as_ref(), &keys::vote_prefix(id))
            .await?
            .into_iter()
            .map(|v: Versioned<VoteRecord>| v.value)
            .collect();
        votes.sort_by_key(|v| (v.cast_at_ms, v.guardian));
        Ok(votes)
    }

    async fn load_config(&self, vault: &KeyId) -> KeyhavenResult<Versioned<SocialConfig>> {
        load_record(self.effects.as_ref(), &keys::social_config(vault))
            .await?
            .ok_or_else(|| KeyhavenError::not_configured(format!("social recovery for {vault}")))
    }

    async fn load_proposal(&self, id: &ProposalId) -> KeyhavenResult<Versioned<RecoveryProposal>> {
        load_record(self.effects.as_ref(), &keys::proposal(id))
            .await?
            .ok_or_else(|| KeyhavenError::not_found(id.to_string()))
    }

    async fn require_guardian(&self, vault: &KeyId, address: &Address) -> KeyhavenResult<()> {
        let guardian: Option<Versioned<Guardian>> =
            load_record(self.effects.as_ref(), &keys::guardian(vault, address)).await?;
        match guardian {
            Some(g) if g.value.is_active => Ok(()),
            _ => Err(KeyhavenError::not_guardian(format!(
                "{address} does not guard {vault}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use keyhaven_core::HOUR_MS;
    use keyhaven_testkit::{address, TestEffects};

    const OWNER: u32 = 100;
    const NEW_OWNER: u32 = 200;

    async fn setup(guardians: u32, required: u32) -> (TestEffects, GuardianSessions<TestEffects>, KeyId) {
        let effects = TestEffects::new(5, 50_000);
        let sessions = GuardianSessions::new(Arc::new(effects.clone()), RecoverySettings::default());
        let vault = KeyId::new("vault");
        sessions.configure(&vault, required, 2 * HOUR_MS).await.unwrap();
        for n in 1..=guardians {
            sessions
                .add_guardian(&vault, address(OWNER), address(n), vec![n as u8], "loc")
                .await
                .unwrap();
        }
        (effects, sessions, vault)
    }

    #[tokio::test]
    async fn configure_validates_and_runs_once() {
        let effects = TestEffects::new(5, 0);
        let sessions = GuardianSessions::new(Arc::new(effects), RecoverySettings::default());
        let vault = KeyId::new("v");
        assert_matches!(
            sessions.configure(&vault, 0, 2 * HOUR_MS).await,
            Err(KeyhavenError::InvalidParameters { .. })
        );
        assert_matches!(
            sessions.configure(&vault, 2, HOUR_MS - 1).await,
            Err(KeyhavenError::InvalidParameters { .. })
        );
        sessions.configure(&vault, 2, HOUR_MS).await.unwrap();
        assert_matches!(
            sessions.configure(&vault, 2, HOUR_MS).await,
            Err(KeyhavenError::AlreadyConfigured { .. })
        );
    }

    #[tokio::test]
    async fn guardian_validation() {
        let (_, sessions, vault) = setup(1, 1).await;
        for bad in [Address::ZERO, address(OWNER), address(1)] {
            assert_matches!(
                sessions.add_guardian(&vault, address(OWNER), bad, vec![], "l").await,
                Err(KeyhavenError::InvalidGuardian { .. })
            );
        }
        assert_eq!(sessions.config(&vault).await.unwrap().unwrap().total_guardians, 1);
    }

    #[tokio::test]
    async fn removal_updates_count_and_allows_re_adding() {
        let (_, sessions, vault) = setup(3, 2).await;
        sessions.remove_guardian(&vault, &address(2)).await.unwrap();
        assert_eq!(sessions.config(&vault).await.unwrap().unwrap().total_guardians, 2);
        assert_eq!(sessions.guardians(&vault).await.unwrap().len(), 2);
        assert_matches!(
            sessions.remove_guardian(&vault, &address(2)).await,
            Err(KeyhavenError::NotGuardian { .. })
        );
        sessions
            .add_guardian(&vault, address(OWNER), address(2), vec![], "l")
            .await
            .unwrap();
        assert_eq!(sessions.config(&vault).await.unwrap().unwrap().total_guardians, 3);
    }

    #[tokio::test]
    async fn propose_validates_proposer_and_target() {
        let (_, sessions, vault) = setup(2, 1).await;
        assert_matches!(
            sessions.propose(&vault, address(OWNER), address(9), address(NEW_OWNER)).await,
            Err(KeyhavenError::NotGuardian { .. })
        );
        assert_matches!(
            sessions.propose(&vault, address(OWNER), address(1), Address::ZERO).await,
            Err(KeyhavenError::InvalidParameters { .. })
        );
        assert_matches!(
            sessions.propose(&vault, address(OWNER), address(1), address(OWNER)).await,
            Err(KeyhavenError::InvalidParameters { .. })
        );

        let proposal = sessions
            .propose(&vault, address(OWNER), address(1), address(NEW_OWNER))
            .await
            .unwrap();
        assert_eq!(proposal.votes_for, 1);
        assert!(proposal.has_voted(&address(1)));
        assert_eq!(proposal.deadline_ms, 50_000 + 2 * HOUR_MS);
    }

    #[tokio::test]
    async fn vote_guards() {
        let (effects, sessions, vault) = setup(3, 2).await;
        let p = sessions
            .propose(&vault, address(OWNER), address(1), address(NEW_OWNER))
            .await
            .unwrap();
        assert_matches!(
            sessions.vote(&p.id, address(1), VoteChoice::For).await,
            Err(KeyhavenError::AlreadyVoted { .. })
        );
        assert_matches!(
            sessions.vote(&p.id, address(7), VoteChoice::For).await,
            Err(KeyhavenError::NotGuardian { .. })
        );
        let p2 = sessions.vote(&p.id, address(2), VoteChoice::Against).await.unwrap();
        assert_eq!((p2.votes_for, p2.votes_against), (1, 1));

        effects.time().advance_ms(2 * HOUR_MS + 1);
        assert_matches!(
            sessions.vote(&p.id, address(3), VoteChoice::For).await,
            Err(KeyhavenError::VotingClosed { .. })
        );
        assert_eq!(sessions.vote_log(&p.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn majority_against_rejects_early() {
        let (_, sessions, vault) = setup(3, 2).await;
        let p = sessions
            .propose(&vault, address(OWNER), address(1), address(NEW_OWNER))
            .await
            .unwrap();
        sessions.vote(&p.id, address(2), VoteChoice::Against).await.unwrap();
        assert_matches!(
            sessions.reject(&p.id).await,
            Err(KeyhavenError::RejectionNotPermitted { .. })
        );
        sessions.vote(&p.id, address(3), VoteChoice::Against).await.unwrap();
        let rejected = sessions.reject(&p.id).await.unwrap();
        assert!(!rejected.is_active && !rejected.is_executed);

        assert_matches!(
            sessions.vote(&p.id, address(2), VoteChoice::For).await,
            Err(KeyhavenError::NotActive { .. })
        );
        assert_matches!(sessions.execute(&p.id).await, Err(KeyhavenError::NotActive { .. }));
    }

    #[tokio::test]
    async fn lapsed_proposal_can_be_rejected() {
        let (effects, sessions, vault) = setup(3, 2).await;
        let p = sessions
            .propose(&vault, address(OWNER), address(1), address(NEW_OWNER))
            .await
            .unwrap();
        effects.time().advance_ms(2 * HOUR_MS);
        assert_matches!(
            sessions.execute(&p.id).await,
            Err(KeyhavenError::QuorumNotReached { .. })
        );
        sessions.reject(&p.id).await.unwrap();
    }

    #[tokio::test]
    async fn removed_guardian_votes_stay_in_the_log() {
        let (_, sessions, vault) = setup(3, 2).await;
        let p = sessions
            .propose(&vault, address(OWNER), address(1), address(NEW_OWNER))
            .await
            .unwrap();
        sessions.vote(&p.id, address(2), VoteChoice::For).await.unwrap();
        sessions.remove_guardian(&vault, &address(2)).await.unwrap();
        let log = sessions.vote_log(&p.id).await.unwrap();
        assert!(log.iter().any(|v| v.guardian == address(2)));
        assert_eq!(sessions.proposal(&p.id).await.unwrap().unwrap().votes_for, 2);
    }
}
