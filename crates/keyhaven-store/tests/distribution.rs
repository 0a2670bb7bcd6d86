//! End-to-end distribution, renewal and expiry against the scripted transport

use assert_matches::assert_matches;
use keyhaven_core::{Address, KeyId, KeyhavenError, StorageSettings, DAY_MS};
use keyhaven_store::{DealStatus, DistributionRequest, StorageCoordinator, StorageProvider};
use keyhaven_testkit::{address, init_test_tracing, TestEffects};

const START_MS: u64 = 1_700_000_000_000;

async fn setup(providers: u32, settings: StorageSettings) -> StorageCoordinator<TestEffects> {
    init_test_tracing();
    let coordinator = StorageCoordinator::new(TestEffects::new(7, START_MS), settings).unwrap();
    for n in 1..=providers {
        coordinator
            .register_provider(StorageProvider::new(address(n), 50 + n as u8, 10).unwrap())
            .await
            .unwrap();
    }
    coordinator
}

fn three_of_four() -> StorageSettings {
    StorageSettings {
        min_replicas: 3,
        max_replicas: 4,
        ..StorageSettings::default()
    }
}

fn request(providers: &[Address]) -> DistributionRequest {
    DistributionRequest::replicated(KeyId::new("vault-1"), b"encrypted share bundle", providers)
}

fn all_four() -> Vec<Address> {
    (1..=4).map(address).collect()
}

#[tokio::test]
async fn one_failed_provider_still_meets_redundancy() {
    let coordinator = setup(4, three_of_four()).await;
    coordinator.effects().transport().fail_uploads_to(address(2));

    let report = coordinator.distribute(&request(&all_four())).await.unwrap();
    assert_eq!(report.success_count, 3);
    assert!(report.redundancy_met);
    assert_eq!(report.deals.len(), 3);
    assert_eq!(report.missing_providers(), vec![address(2)]);

    let deals = coordinator.deals(&report.data_hash).await.unwrap();
    let failed: Vec<_> = deals.iter().filter(|d| d.status == DealStatus::Failed).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].provider, address(2));
    assert!(failed[0].failure.is_some());
    assert!(deals
        .iter()
        .filter(|d| d.status == DealStatus::Active)
        .all(|d| !d.deal_id.is_empty() && d.end_epoch_ms == START_MS + 30 * DAY_MS));
}

#[tokio::test]
async fn two_failed_providers_report_the_shortfall() {
    let coordinator = setup(4, three_of_four()).await;
    let transport = coordinator.effects().transport();
    transport.fail_uploads_to(address(3));
    transport.fail_uploads_to(address(4));

    let err = coordinator.distribute(&request(&all_four())).await.unwrap_err();
    assert_matches!(
        &err,
        KeyhavenError::RedundancyNotMet { achieved: 2, required: 3, missing }
            if missing.len() == 2
    );
    assert!(err.is_retryable());

    // Accepted replicas stay recorded
    let hash = request(&all_four()).data_hash;
    let tracker = coordinator.tracker(&hash).await.unwrap();
    assert_eq!(tracker.stats(&hash).active, 2);
    assert_eq!(tracker.failed_providers(&hash).len(), 2);
}

#[tokio::test]
async fn retry_covers_only_missing_providers() {
    let coordinator = setup(4, three_of_four()).await;
    let transport = coordinator.effects().transport();
    transport.fail_uploads_to(address(3));
    transport.fail_uploads_to(address(4));

    let req = request(&all_four());
    let report = coordinator.attempt_distribution(&req).await.unwrap();
    assert!(!report.redundancy_met);

    transport.heal(address(3));
    let retried = coordinator
        .retry_missing(&req, &report.missing_providers())
        .await
        .unwrap();
    assert_eq!(retried.success_count, 3);
    assert_eq!(retried.missing_providers(), vec![address(4)]);

    let attempts = transport.upload_attempts();
    assert_eq!(attempts.iter().filter(|a| **a == address(1)).count(), 1);
    assert_eq!(attempts.iter().filter(|a| **a == address(3)).count(), 2);
    assert!(coordinator.is_redundancy_met(&req.data_hash, 3).await.unwrap());
}

#[tokio::test]
async fn slow_provider_times_out_without_blocking_others() {
    let settings = StorageSettings {
        upload_timeout_ms: 50,
        ..three_of_four()
    };
    let coordinator = setup(4, settings).await;
    coordinator
        .effects()
        .transport()
        .delay_uploads_to(address(4), 5_000);

    let report = coordinator.distribute(&request(&all_four())).await.unwrap();
    assert_eq!(report.success_count, 3);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, address(4));
    assert!(report.failures[0].1.contains("timed out"));
}

#[tokio::test]
async fn replicas_on_inactive_providers_do_not_count() {
    let coordinator = setup(4, three_of_four()).await;
    let req = request(&[address(1), address(2), address(3)]);
    coordinator.distribute(&req).await.unwrap();
    assert!(coordinator.is_redundancy_met(&req.data_hash, 3).await.unwrap());

    coordinator.set_provider_active(&address(1), false).await.unwrap();
    assert!(!coordinator.is_redundancy_met(&req.data_hash, 3).await.unwrap());
    assert!(coordinator.is_redundancy_met(&req.data_hash, 2).await.unwrap());

    let picked = coordinator.select_providers(&[], 3).await.unwrap();
    assert!(picked.iter().all(|p| p.address != address(1)));
}

#[tokio::test]
async fn too_few_active_providers_is_rejected_before_upload() {
    let coordinator = setup(3, three_of_four()).await;
    coordinator.set_provider_active(&address(3), false).await.unwrap();

    let err = coordinator
        .distribute(&request(&[address(1), address(2), address(3)]))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        KeyhavenError::InsufficientProviders {
            available: 2,
            required: 3
        }
    );
    assert!(coordinator.effects().transport().upload_attempts().is_empty());
}

#[tokio::test]
async fn renewal_extends_deals_inside_the_window() {
    let coordinator = setup(4, three_of_four()).await;
    let req = request(&[address(1), address(2), address(3)]);
    coordinator.distribute(&req).await.unwrap();

    // Nothing is close to its end yet
    let early = coordinator.renew_expiring().await.unwrap();
    assert!(early.renewed.is_empty() && early.failed.is_empty());

    coordinator.effects().time().advance_ms(24 * DAY_MS);
    coordinator.effects().transport().fail_renewals_to(address(2));
    let report = coordinator.renew_expiring().await.unwrap();
    assert_eq!(report.renewed.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, address(2));

    let extension = StorageSettings::default().renewal_extension_ms;
    for deal in coordinator.deals(&req.data_hash).await.unwrap() {
        if deal.provider == address(2) {
            assert_eq!(deal.status, DealStatus::Active);
            assert_eq!(deal.end_epoch_ms, START_MS + 30 * DAY_MS);
        } else {
            assert_eq!(deal.status, DealStatus::Renewed);
            assert_eq!(deal.end_epoch_ms, START_MS + 30 * DAY_MS + extension);
        }
    }
    assert_eq!(coordinator.effects().transport().renewals().len(), 2);

    let facts = coordinator.effects().fact_types().await;
    assert_eq!(facts.iter().filter(|f| *f == "storage:deal-renewed").count(), 2);
    assert_eq!(
        facts.iter().filter(|f| *f == "storage:deal-renewal-failed").count(),
        1
    );
}

#[tokio::test]
async fn unjournaled_renewal_failure_does_not_stop_the_sweep() {
    let coordinator = setup(4, three_of_four()).await;
    let req = request(&[address(1), address(2), address(3)]);
    coordinator.distribute(&req).await.unwrap();

    coordinator.effects().time().advance_ms(24 * DAY_MS);
    coordinator.effects().transport().fail_renewals_to(address(1));
    coordinator.effects().fail_commits_with("storage:deal-renewal-failed");

    let report = coordinator.renew_expiring().await.unwrap();
    assert_eq!(report.renewed.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, address(1));

    let renewed = coordinator
        .deals(&req.data_hash)
        .await
        .unwrap()
        .into_iter()
        .filter(|d| d.status == DealStatus::Renewed)
        .count();
    assert_eq!(renewed, 2);
    let facts = coordinator.effects().fact_types().await;
    assert!(!facts.iter().any(|f| f == "storage:deal-renewal-failed"));
}

#[tokio::test]
async fn unrenewed_deals_expire() {
    let coordinator = setup(4, three_of_four()).await;
    let req = request(&[address(1), address(2), address(3)]);
    coordinator.distribute(&req).await.unwrap();

    coordinator.effects().time().advance_ms(24 * DAY_MS);
    coordinator.effects().transport().fail_renewals_to(address(2));
    coordinator.renew_expiring().await.unwrap();

    coordinator.effects().time().advance_ms(7 * DAY_MS);
    let expired = coordinator.expire_deals().await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].provider, address(2));

    let p2 = coordinator.provider(&address(2)).await.unwrap().unwrap();
    assert_eq!(p2.active_deal_count, 0);
    assert!(!coordinator.is_redundancy_met(&req.data_hash, 3).await.unwrap());

    // A second sweep finds nothing new
    assert!(coordinator.expire_deals().await.unwrap().is_empty());
}

#[tokio::test]
async fn redistribution_skips_live_replicas() {
    let coordinator = setup(4, three_of_four()).await;
    let req = request(&[address(1), address(2), address(3)]);
    coordinator.distribute(&req).await.unwrap();
    let again = coordinator.distribute(&req).await.unwrap();
    assert!(again.deals.is_empty());
    assert_eq!(again.success_count, 3);
    assert_eq!(coordinator.effects().transport().upload_attempts().len(), 3);
}
