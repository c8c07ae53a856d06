//! Ledger maintenance across a whole repository

mod common;

use chrono::{Duration, Utc};

use vaultscan_artifact_scanner::ledger::{format_timestamp, labels};
use vaultscan_artifact_scanner::{
    Artifact, InMemoryCatalog, LedgerMaintenance, RiskSummary, ScannerError, StatusLedger, TaskStatus,
};

use common::date;

const REPO: &str = "releases";

/// Seeds `a.zip` SUCCESS, `b.zip` FAILURE, `c.zip` stale PENDING,
/// `d.zip` fresh PENDING and `e.zip` untouched.
async fn seeded() -> InMemoryCatalog {
    let catalog = InMemoryCatalog::new();
    for name in ["a.zip", "b.zip", "c.zip", "d.zip", "e.zip"] {
        catalog.insert(Artifact::new(REPO, name, date(2020, 1, 1))).await;
    }
    let ledger = StatusLedger::new(&catalog);

    let mut a = catalog.artifact(REPO, "a.zip").await.unwrap();
    ledger
        .mark_success(&mut a, &RiskSummary::default(), "Analysis complete")
        .await
        .unwrap();
    let mut b = catalog.artifact(REPO, "b.zip").await.unwrap();
    ledger.mark_failure(&mut b, "scan limit reached").await.unwrap();

    for (name, age) in [("c.zip", Duration::hours(48)), ("d.zip", Duration::hours(1))] {
        let mut artifact = catalog.artifact(REPO, name).await.unwrap();
        artifact.panel.set(labels::TASK_STATUS, "PENDING");
        artifact
            .panel
            .set(labels::TASK_FINISHED_TIME, format_timestamp(Utc::now() - age));
        catalog.insert(artifact).await;
    }
    catalog
}

#[tokio::test]
async fn test_reset_failures_only_touches_failed_artifacts() {
    let catalog = seeded().await;
    let cleared = LedgerMaintenance::new(&catalog)
        .reset_failures(REPO)
        .await
        .unwrap();
    assert_eq!(cleared, 1);
    assert!(catalog.artifact(REPO, "b.zip").await.unwrap().panel.is_empty());
    assert!(!catalog.artifact(REPO, "a.zip").await.unwrap().panel.is_empty());
}

#[tokio::test]
async fn test_reset_stale_pending_respects_window() {
    let catalog = seeded().await;
    let cleared = LedgerMaintenance::new(&catalog)
        .with_page_size(2)
        .reset_stale_pending(REPO, Utc::now(), Duration::hours(24))
        .await
        .unwrap();
    assert_eq!(cleared, 1);
    assert!(catalog.artifact(REPO, "c.zip").await.unwrap().panel.is_empty());
    assert_eq!(
        catalog.artifact(REPO, "d.zip").await.unwrap().panel.get(labels::TASK_STATUS),
        Some("PENDING")
    );
}

#[tokio::test]
async fn test_clear_all_counts_only_recorded_artifacts() {
    let catalog = seeded().await;
    let cleared = LedgerMaintenance::new(&catalog)
        .with_page_size(1)
        .clear_all(REPO)
        .await
        .unwrap();
    assert_eq!(cleared, 4);
    for artifact in catalog.artifacts(REPO).await {
        assert!(artifact.panel.is_empty(), "{} still has a panel", artifact.name);
    }
}

#[tokio::test]
async fn test_entries_reports_corrupt_panels_without_stopping() {
    let catalog = seeded().await;
    let mut broken = catalog.artifact(REPO, "e.zip").await.unwrap();
    broken.panel.set(labels::CRITICAL_VULNERABILITIES, "many");
    catalog.insert(broken).await;

    let entries = LedgerMaintenance::new(&catalog).entries(REPO).await.unwrap();
    assert_eq!(entries.len(), 5);

    let statuses: Vec<_> = entries
        .iter()
        .map(|(_, e)| e.as_ref().ok().and_then(|e| e.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            Some(TaskStatus::Success),
            Some(TaskStatus::Failure),
            Some(TaskStatus::Pending),
            Some(TaskStatus::Pending),
            None,
        ]
    );
    assert!(matches!(
        entries[4].1,
        Err(ScannerError::LedgerCorrupt { ref label, .. }) if label == labels::CRITICAL_VULNERABILITIES
    ));
}

#[tokio::test]
async fn test_unavailable_catalog_is_fatal() {
    let catalog = seeded().await;
    catalog.set_unavailable(true);
    let err = LedgerMaintenance::new(&catalog)
        .clear_all(REPO)
        .await
        .unwrap_err();
    assert!(err.is_fatal());
}
