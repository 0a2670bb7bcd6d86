//! Backup to storage providers and Shamir recovery through the orchestrator

use assert_matches::assert_matches;
use keyhaven_core::{Address, KeyId, KeyhavenConfig, KeyhavenError, DAY_MS};
use keyhaven_crypto::{encode_share, split_secret};
use keyhaven_recovery::{
    RecoveryHandle, RecoveryInitiation, RecoveryMethod, RecoveryOrchestrator,
};
use keyhaven_store::StorageProvider;
use keyhaven_testkit::{address, init_test_tracing, key_id, sample_secret, TestEffects};
use std::sync::Arc;

const START_MS: u64 = 1_700_000_000_000;
const OWNER: u32 = 1;
const HEIR: u32 = 2;

struct Harness {
    effects: TestEffects,
    orchestrator: RecoveryOrchestrator<TestEffects>,
}

/// Provider `i` receives share `i`: equal reputation and price order by address
fn provider(i: u32) -> Address {
    address(100 + i)
}

async fn harness(providers: u32) -> Harness {
    init_test_tracing();
    let effects = TestEffects::new(11, START_MS);
    let orchestrator =
        RecoveryOrchestrator::new(Arc::new(effects.clone()), &KeyhavenConfig::default()).unwrap();
    for i in 1..=providers {
        orchestrator
            .storage()
            .register_provider(StorageProvider::new(provider(i), 80, 10).unwrap())
            .await
            .unwrap();
    }
    Harness {
        effects,
        orchestrator,
    }
}

async fn shamir_vault(h: &Harness, vault: &KeyId, m: usize, n: usize) {
    h.orchestrator.register_vault(vault, address(OWNER)).await.unwrap();
    h.orchestrator.enable_shamir(vault, m, n).await.unwrap();
}

fn uploaded_share(h: &Harness, index: u32) -> String {
    let payload = h.effects.transport().stored_payload(&provider(index)).unwrap();
    String::from_utf8(payload).unwrap()
}

async fn start_session(h: &Harness, vault: &KeyId, initiator: Address) -> keyhaven_core::SessionId {
    match h
        .orchestrator
        .initiate_recovery(vault, RecoveryInitiation::Shamir { initiator })
        .await
        .unwrap()
    {
        RecoveryHandle::Shamir(id) => id,
        other => panic!("expected a shamir session, got {other:?}"),
    }
}

#[tokio::test]
async fn three_of_five_backup_recovers_from_shares_two_four_five() {
    let h = harness(5).await;
    let vault = key_id(1);
    shamir_vault(&h, &vault, 3, 5).await;
    let secret = sample_secret(32);

    let receipt = h.orchestrator.backup_secret(&vault, &secret, &[]).await.unwrap();
    assert_eq!(receipt.stored_indices, vec![1, 2, 3, 4, 5]);
    assert!(receipt.missing_indices.is_empty());
    assert_eq!(receipt.deals.len(), 5);

    let records = h.orchestrator.shamir().share_records(&vault).await.unwrap();
    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|r| r.is_active));
    assert_eq!(records[0].custodian_id, provider(1).to_string());

    let session = start_session(&h, &vault, address(HEIR)).await;
    for index in [2, 4] {
        let state = h
            .orchestrator
            .submit_encoded_share(&vault, &session, &uploaded_share(&h, index))
            .await
            .unwrap();
        assert!(!state.is_complete);
    }
    assert_matches!(
        h.orchestrator.complete_shamir_recovery(&vault, &session).await,
        Err(KeyhavenError::NotComplete { .. })
    );
    let state = h
        .orchestrator
        .submit_encoded_share(&vault, &session, &uploaded_share(&h, 5))
        .await
        .unwrap();
    assert!(state.is_complete);
    assert_eq!(state.submitted_indices(), vec![2, 4, 5]);

    let outcome = h.orchestrator.complete_shamir_recovery(&vault, &session).await.unwrap();
    assert_eq!(outcome.secret.as_slice(), secret.as_slice());
    let transfer = outcome.transfer.unwrap();
    assert_eq!(transfer.previous_owner, address(OWNER));
    assert_eq!(transfer.new_owner, address(HEIR));
    assert_eq!(transfer.ownership_epoch, 1);

    let record = h.orchestrator.vault(&vault).await.unwrap().unwrap();
    assert_eq!(record.owner, address(HEIR));
    assert_eq!(record.ownership_epoch, 1);

    assert_matches!(
        h.orchestrator.complete_shamir_recovery(&vault, &session).await,
        Err(KeyhavenError::AlreadyFinalized { .. })
    );
    let record = h.orchestrator.vault(&vault).await.unwrap().unwrap();
    assert_eq!(record.ownership_epoch, 1);
}

#[tokio::test]
async fn owner_recovering_their_own_key_keeps_the_vault() {
    let h = harness(3).await;
    let vault = key_id(1);
    shamir_vault(&h, &vault, 2, 3).await;
    let secret = sample_secret(16);
    h.orchestrator.backup_secret(&vault, &secret, &[]).await.unwrap();

    let session = start_session(&h, &vault, address(OWNER)).await;
    for index in [1, 3] {
        h.orchestrator
            .submit_encoded_share(&vault, &session, &uploaded_share(&h, index))
            .await
            .unwrap();
    }
    let outcome = h.orchestrator.complete_shamir_recovery(&vault, &session).await.unwrap();
    assert_eq!(outcome.secret.as_slice(), secret.as_slice());
    assert!(outcome.transfer.is_none());
    let record = h.orchestrator.vault(&vault).await.unwrap().unwrap();
    assert_eq!((record.owner, record.ownership_epoch), (address(OWNER), 0));
}

#[tokio::test]
async fn expired_session_cannot_transfer_the_vault() {
    let h = harness(5).await;
    let vault = key_id(1);
    shamir_vault(&h, &vault, 3, 5).await;
    h.orchestrator.backup_secret(&vault, &sample_secret(32), &[]).await.unwrap();

    let session = start_session(&h, &vault, address(HEIR)).await;
    for index in [1, 2, 3] {
        h.orchestrator
            .submit_encoded_share(&vault, &session, &uploaded_share(&h, index))
            .await
            .unwrap();
    }
    h.effects.time().advance_ms(DAY_MS + 1);

    assert_matches!(
        h.orchestrator.complete_shamir_recovery(&vault, &session).await,
        Err(KeyhavenError::Expired { .. })
    );
    assert_matches!(
        h.orchestrator.shamir().reconstruct(&session).await,
        Err(KeyhavenError::Expired { .. })
    );
    let record = h.orchestrator.vault(&vault).await.unwrap().unwrap();
    assert_eq!((record.owner, record.ownership_epoch), (address(OWNER), 0));
    let state = h.orchestrator.shamir().session(&session).await.unwrap().unwrap();
    assert!(state.is_complete);
    assert!(!state.is_finalized);
}

#[tokio::test]
async fn submissions_after_the_deadline_are_refused() {
    let h = harness(3).await;
    let vault = key_id(1);
    shamir_vault(&h, &vault, 2, 3).await;
    h.orchestrator.backup_secret(&vault, &sample_secret(16), &[]).await.unwrap();

    let session = start_session(&h, &vault, address(HEIR)).await;
    h.orchestrator
        .submit_encoded_share(&vault, &session, &uploaded_share(&h, 1))
        .await
        .unwrap();
    h.effects.time().advance_ms(DAY_MS + 1);
    assert_matches!(
        h.orchestrator
            .submit_encoded_share(&vault, &session, &uploaded_share(&h, 2))
            .await,
        Err(KeyhavenError::Expired { .. })
    );
}

#[tokio::test]
async fn share_count_must_fit_the_replica_bounds() {
    let h = harness(0).await;
    let vault = key_id(1);
    h.orchestrator.register_vault(&vault, address(OWNER)).await.unwrap();

    for (m, n) in [(2, 2), (2, 11)] {
        assert_matches!(
            h.orchestrator.enable_shamir(&vault, m, n).await,
            Err(KeyhavenError::InvalidParameters { .. })
        );
    }
    let record = h.orchestrator.vault(&vault).await.unwrap().unwrap();
    assert_eq!(record.method, RecoveryMethod::None);
    assert!(h.orchestrator.shamir().config(&vault).await.unwrap().is_none());
    h.orchestrator.enable_shamir(&vault, 2, 10).await.unwrap();
}

#[tokio::test]
async fn second_backup_leaves_the_first_in_place() {
    let h = harness(5).await;
    let vault = key_id(1);
    shamir_vault(&h, &vault, 3, 5).await;
    let secret = sample_secret(32);
    h.orchestrator.backup_secret(&vault, &secret, &[]).await.unwrap();
    let attempts = h.effects.transport().upload_attempts().len();

    assert_matches!(
        h.orchestrator.backup_secret(&vault, &sample_secret(32), &[]).await,
        Err(KeyhavenError::InvalidParameters { .. })
    );
    assert_eq!(h.effects.transport().upload_attempts().len(), attempts);
    assert_eq!(h.orchestrator.shamir().share_records(&vault).await.unwrap().len(), 5);

    let session = start_session(&h, &vault, address(HEIR)).await;
    for index in [1, 3, 5] {
        h.orchestrator
            .submit_encoded_share(&vault, &session, &uploaded_share(&h, index))
            .await
            .unwrap();
    }
    let outcome = h.orchestrator.complete_shamir_recovery(&vault, &session).await.unwrap();
    assert_eq!(outcome.secret.as_slice(), secret.as_slice());
}

#[tokio::test]
async fn recovering_guardian_is_retired_with_the_transfer() {
    let h = harness(3).await;
    let vault = key_id(1);
    shamir_vault(&h, &vault, 2, 3).await;
    h.orchestrator
        .enable_social(&vault, 1, keyhaven_core::HOUR_MS)
        .await
        .unwrap();
    h.orchestrator
        .add_guardian(&vault, address(HEIR), vec![7; 8], "locator")
        .await
        .unwrap();
    h.orchestrator.backup_secret(&vault, &sample_secret(16), &[]).await.unwrap();

    let session = start_session(&h, &vault, address(HEIR)).await;
    for index in [1, 2] {
        h.orchestrator
            .submit_encoded_share(&vault, &session, &uploaded_share(&h, index))
            .await
            .unwrap();
    }
    let outcome = h.orchestrator.complete_shamir_recovery(&vault, &session).await.unwrap();
    assert!(outcome.transfer.is_some());

    assert!(h.orchestrator.guardians().guardians(&vault).await.unwrap().is_empty());
    let config = h.orchestrator.guardians().config(&vault).await.unwrap().unwrap();
    assert_eq!(config.total_guardians, 0);
}

#[tokio::test]
async fn one_failed_upload_is_reported_and_not_recorded() {
    let h = harness(5).await;
    let vault = key_id(1);
    shamir_vault(&h, &vault, 3, 5).await;
    h.effects.transport().fail_uploads_to(provider(2));
    let secret = sample_secret(32);

    let receipt = h.orchestrator.backup_secret(&vault, &secret, &[]).await.unwrap();
    assert_eq!(receipt.stored_indices, vec![1, 3, 4, 5]);
    assert_eq!(receipt.missing_indices, vec![2]);
    assert!(h
        .orchestrator
        .shamir()
        .share_record(&vault, 2)
        .await
        .unwrap()
        .is_none());

    let session = start_session(&h, &vault, address(HEIR)).await;
    for index in [1, 3, 4] {
        h.orchestrator
            .submit_encoded_share(&vault, &session, &uploaded_share(&h, index))
            .await
            .unwrap();
    }
    let outcome = h.orchestrator.complete_shamir_recovery(&vault, &session).await.unwrap();
    assert_eq!(outcome.secret.as_slice(), secret.as_slice());
}

#[tokio::test]
async fn backup_below_the_replica_minimum_records_nothing() {
    let h = harness(5).await;
    let vault = key_id(1);
    shamir_vault(&h, &vault, 3, 5).await;
    for i in [1, 2, 3] {
        h.effects.transport().fail_uploads_to(provider(i));
    }

    let err = h
        .orchestrator
        .backup_secret(&vault, &sample_secret(32), &[])
        .await
        .unwrap_err();
    assert_matches!(
        &err,
        KeyhavenError::RedundancyNotMet { achieved: 2, required: 3, missing }
            if missing.len() == 3
    );
    assert!(err.is_retryable());
    assert!(h.orchestrator.shamir().share_records(&vault).await.unwrap().is_empty());
}

#[tokio::test]
async fn excluded_providers_receive_nothing() {
    let h = harness(6).await;
    let vault = key_id(1);
    shamir_vault(&h, &vault, 2, 4).await;

    let receipt = h
        .orchestrator
        .backup_secret(&vault, &sample_secret(8), &[provider(1), provider(4)])
        .await
        .unwrap();
    assert_eq!(receipt.stored_indices, vec![1, 2, 3, 4]);
    let attempted = h.effects.transport().upload_attempts();
    assert!(!attempted.contains(&provider(1)));
    assert!(!attempted.contains(&provider(4)));
    assert_eq!(attempted.len(), 4);
}

#[tokio::test]
async fn revoked_share_drops_out_of_a_complete_session() {
    let h = harness(5).await;
    let vault = key_id(1);
    shamir_vault(&h, &vault, 3, 5).await;
    h.orchestrator.backup_secret(&vault, &sample_secret(32), &[]).await.unwrap();

    let session = start_session(&h, &vault, address(HEIR)).await;
    for index in [2, 4, 5] {
        h.orchestrator
            .submit_encoded_share(&vault, &session, &uploaded_share(&h, index))
            .await
            .unwrap();
    }
    h.orchestrator.revoke_share(&vault, 4).await.unwrap();

    assert_matches!(
        h.orchestrator.complete_shamir_recovery(&vault, &session).await,
        Err(KeyhavenError::InsufficientShares { provided: 2, required: 3 })
    );
    let record = h.orchestrator.vault(&vault).await.unwrap().unwrap();
    assert_eq!(record.owner, address(OWNER));
}

#[tokio::test]
async fn revocation_is_permanent_and_touches_one_index() {
    let h = harness(5).await;
    let vault = key_id(1);
    shamir_vault(&h, &vault, 3, 5).await;
    h.orchestrator.backup_secret(&vault, &sample_secret(32), &[]).await.unwrap();

    h.orchestrator.revoke_share(&vault, 3).await.unwrap();
    assert_matches!(
        h.orchestrator.revoke_share(&vault, 3).await,
        Err(KeyhavenError::ShareNotActive { .. })
    );
    let records = h.orchestrator.shamir().share_records(&vault).await.unwrap();
    let active: Vec<u8> = records.iter().filter(|r| r.is_active).map(|r| r.index).collect();
    assert_eq!(active, vec![1, 2, 4, 5]);

    let session = start_session(&h, &vault, address(HEIR)).await;
    assert_matches!(
        h.orchestrator
            .submit_encoded_share(&vault, &session, &uploaded_share(&h, 3))
            .await,
        Err(KeyhavenError::ShareNotActive { .. })
    );
}

#[tokio::test]
async fn shares_of_another_vault_are_refused() {
    let h = harness(3).await;
    let vault = key_id(1);
    shamir_vault(&h, &vault, 2, 3).await;
    h.orchestrator.backup_secret(&vault, &sample_secret(16), &[]).await.unwrap();
    let session = start_session(&h, &vault, address(HEIR)).await;

    let foreign = split_secret(&sample_secret(16), 2, 3, &key_id(9), 0).unwrap();
    assert_matches!(
        h.orchestrator
            .submit_encoded_share(&vault, &session, &encode_share(&foreign[0]).unwrap())
            .await,
        Err(KeyhavenError::MismatchedShares { .. })
    );
    assert_matches!(
        h.orchestrator.submit_encoded_share(&vault, &session, "not a share").await,
        Err(KeyhavenError::InvalidShareEncoding { .. })
    );
}

#[tokio::test]
async fn sessions_are_scoped_to_their_vault() {
    let h = harness(3).await;
    let first = key_id(1);
    let second = key_id(2);
    shamir_vault(&h, &first, 2, 3).await;
    shamir_vault(&h, &second, 2, 3).await;
    h.orchestrator.backup_secret(&first, &sample_secret(16), &[]).await.unwrap();

    let session = start_session(&h, &first, address(HEIR)).await;
    assert_matches!(
        h.orchestrator.submit_share(&second, &session, 1, b"payload").await,
        Err(KeyhavenError::NotFound { .. })
    );
    assert_matches!(
        h.orchestrator.complete_shamir_recovery(&second, &session).await,
        Err(KeyhavenError::NotFound { .. })
    );
}

#[tokio::test]
async fn methods_must_be_enabled_before_use() {
    let h = harness(3).await;
    let vault = key_id(1);
    h.orchestrator.register_vault(&vault, address(OWNER)).await.unwrap();

    assert_matches!(
        h.orchestrator.backup_secret(&vault, &sample_secret(16), &[]).await,
        Err(KeyhavenError::MethodNotEnabled { .. })
    );
    assert_matches!(
        h.orchestrator
            .initiate_recovery(&vault, RecoveryInitiation::Shamir { initiator: address(HEIR) })
            .await,
        Err(KeyhavenError::MethodNotEnabled { .. })
    );
    assert_matches!(
        h.orchestrator.enable_shamir(&key_id(7), 2, 3).await,
        Err(KeyhavenError::NotFound { .. })
    );
}

#[tokio::test]
async fn enabling_both_methods_promotes_once_each() {
    let h = harness(0).await;
    let vault = key_id(1);
    h.orchestrator.register_vault(&vault, address(OWNER)).await.unwrap();
    assert_matches!(
        h.orchestrator.register_vault(&vault, address(OWNER)).await,
        Err(KeyhavenError::AlreadyConfigured { .. })
    );

    let record = h.orchestrator.enable_shamir(&vault, 2, 3).await.unwrap();
    assert_eq!(record.method, RecoveryMethod::Shamir);
    let record = h
        .orchestrator
        .enable_social(&vault, 2, keyhaven_core::HOUR_MS)
        .await
        .unwrap();
    assert_eq!(record.method, RecoveryMethod::Both);

    // A failed reconfiguration leaves the method untouched
    assert_matches!(
        h.orchestrator.enable_shamir(&vault, 2, 3).await,
        Err(KeyhavenError::AlreadyConfigured { .. })
    );
    let record = h.orchestrator.vault(&vault).await.unwrap().unwrap();
    assert_eq!(record.method, RecoveryMethod::Both);

    let changes = h
        .effects
        .fact_types()
        .await
        .into_iter()
        .filter(|t| t == "recovery:recovery-method-changed")
        .count();
    assert_eq!(changes, 2);
}
