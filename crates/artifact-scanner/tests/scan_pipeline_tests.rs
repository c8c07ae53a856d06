//! End-to-end repository runs against in-process collaborators

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use vaultscan_artifact_scanner::ledger::{format_timestamp, labels};
use vaultscan_artifact_scanner::tasks::INTERRUPTED;
use vaultscan_artifact_scanner::{
    Artifact, Component, CountingMode, FsCatalog, InMemoryBlobStore, InMemoryCatalog,
    InspectTaskConfigBuilder, InspectionTask, LedgerEntry, LedgerMaintenance, ScanTask,
    ScanTaskConfigBuilder, TaskStatus,
};
use vaultscan_core::error::{TaskError, VaultscanError};
use vaultscan_core::task::{RepositoryTask, TaskRegistry};
use vaultscan_core::types::{PackageType, Repository, Severity};

use common::{FakeAnalysisServer, FakeConnector, connection, date, seed, server_config};

const REPO: &str = "releases";

fn repo() -> Repository {
    Repository::new(REPO, PackageType::Raw)
}

fn builder(work: &std::path::Path) -> ScanTaskConfigBuilder {
    ScanTaskConfigBuilder::new()
        .enabled(true)
        .name_patterns("*.zip, *.brb")
        .server(server_config())
        .working_dir(work)
        .poll_interval_ms(250)
}

fn scan_task(
    config: vaultscan_artifact_scanner::ScanTaskConfig,
    catalog: &Arc<InMemoryCatalog>,
    blobs: Arc<InMemoryBlobStore>,
    server: &Arc<FakeAnalysisServer>,
) -> ScanTask<InMemoryCatalog, InMemoryBlobStore, FakeConnector> {
    ScanTask::new(config, Arc::clone(catalog), blobs, connection(server)).unwrap()
}

async fn entries(catalog: &InMemoryCatalog) -> Vec<(String, LedgerEntry)> {
    catalog
        .artifacts(REPO)
        .await
        .into_iter()
        .map(|a| {
            let entry = LedgerEntry::from_panel(&a.name, &a.panel).unwrap();
            (a.name, entry)
        })
        .collect()
}

/// Every panel carries exactly one status and no risk outside SUCCESS
fn assert_status_invariant(entries: &[(String, LedgerEntry)]) {
    for (name, entry) in entries {
        if entry == &LedgerEntry::default() {
            continue;
        }
        let status = entry.status.unwrap_or_else(|| panic!("{name} has no status"));
        if status != TaskStatus::Success {
            assert!(!entry.has_risk(), "{name} keeps risk fields under {status}");
        }
        assert!(entry.finished.is_some(), "{name} has no finished time");
    }
}

#[tokio::test(start_paused = true)]
async fn test_every_page_is_visited_once_in_order() {
    let work = tempfile::tempdir().unwrap();
    let names = ["a.zip", "b.zip", "c.zip", "d.zip", "e.zip"];
    let artifacts: Vec<_> = names.iter().map(|n| (*n, date(2020, 1, 1))).collect();
    let (catalog, blobs) = seed(REPO, &artifacts).await;
    let server = Arc::new(FakeAnalysisServer::new());

    let task = scan_task(builder(work.path()).page_size(2).build().unwrap(), &catalog, blobs, &server);
    let report = task.execute(&repo(), CancellationToken::new()).await.unwrap();

    assert_eq!(report.pages, 3);
    assert_eq!(report.examined, 5);
    assert_eq!(report.succeeded, 5);
    let submitted = server.submitted_targets();
    let mut sorted = submitted.clone();
    sorted.sort();
    assert_eq!(submitted, sorted);
    assert_eq!(submitted.len(), 5);
    assert_status_invariant(&entries(&catalog).await);
}

#[tokio::test(start_paused = true)]
async fn test_one_reconciliation_failure_is_isolated() {
    let work = tempfile::tempdir().unwrap();
    let (catalog, blobs) = seed(
        REPO,
        &[
            ("a.zip", date(2020, 1, 1)),
            ("b.zip", date(2020, 1, 1)),
            ("c.zip", date(2020, 1, 1)),
            ("d.zip", date(2020, 1, 1)),
        ],
    )
    .await;
    let server = Arc::new(
        FakeAnalysisServer::new()
            .fail_project("releases/c.zip")
            .vulnerabilities("releases/a.zip", &[Severity::Critical, Severity::Low]),
    );

    let task = scan_task(builder(work.path()).build().unwrap(), &catalog, blobs, &server);
    let report = task.execute(&repo(), CancellationToken::new()).await.unwrap();
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 1);

    let entries = entries(&catalog).await;
    assert_status_invariant(&entries);
    let (_, a) = &entries[0];
    assert_eq!(a.critical, Some(1));
    assert_eq!(a.low, Some(1));
    assert_eq!(a.overall_policy_status.as_deref(), Some("IN_VIOLATION"));
    let (_, c) = &entries[2];
    assert_eq!(c.status, Some(TaskStatus::Failure));
    assert!(c.description.as_deref().unwrap().contains("upstream timeout"));
}

#[tokio::test(start_paused = true)]
async fn test_partial_confirmation_fails_every_artifact_with_same_message() {
    let work = tempfile::tempdir().unwrap();
    let (catalog, blobs) = seed(
        REPO,
        &[
            ("a.zip", date(2020, 1, 1)),
            ("b.zip", date(2020, 1, 1)),
            ("c.zip", date(2020, 1, 1)),
        ],
    )
    .await;
    let server = Arc::new(FakeAnalysisServer::new().confirm_only(&["releases/a.zip", "releases/b.zip"]));

    let task = scan_task(builder(work.path()).build().unwrap(), &catalog, blobs, &server);
    let report = task.execute(&repo(), CancellationToken::new()).await.unwrap();
    assert_eq!(report.failed, 3);
    assert_eq!(report.succeeded, 0);

    let entries = entries(&catalog).await;
    let messages: Vec<_> = entries
        .iter()
        .map(|(_, e)| {
            assert_eq!(e.status, Some(TaskStatus::Failure));
            e.description.clone().unwrap()
        })
        .collect();
    assert!(messages.windows(2).all(|w| w[0] == w[1]));
    assert!(messages[0].contains("within 60 seconds"));
}

#[tokio::test(start_paused = true)]
async fn test_name_patterns_select_zip_and_brb_only() {
    let work = tempfile::tempdir().unwrap();
    let (catalog, blobs) = seed(
        REPO,
        &[
            ("dir/test.brb", date(2020, 1, 1)),
            ("dir/test.fake", date(2020, 1, 1)),
            ("dir/test.zip", date(2020, 1, 1)),
        ],
    )
    .await;
    let server = Arc::new(FakeAnalysisServer::new());

    let task = scan_task(builder(work.path()).build().unwrap(), &catalog, blobs, &server);
    let report = task.execute(&repo(), CancellationToken::new()).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(
        server.submitted_targets(),
        vec!["releases/dir/test.brb", "releases/dir/test.zip"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cutoff_date_excludes_older_artifacts() {
    let work = tempfile::tempdir().unwrap();
    let (catalog, blobs) = seed(
        REPO,
        &[("new.zip", date(2016, 1, 2)), ("old.zip", date(2015, 12, 31))],
    )
    .await;
    let server = Arc::new(FakeAnalysisServer::new());
    let cutoff = vaultscan_core::config::parse_cutoff_date("2016-01-01T00:00:00.000").unwrap();

    let task = scan_task(
        builder(work.path()).cutoff(cutoff).build().unwrap(),
        &catalog,
        blobs,
        &server,
    );
    task.execute(&repo(), CancellationToken::new()).await.unwrap();
    assert_eq!(server.submitted_targets(), vec!["releases/new.zip"]);
    assert!(catalog.artifact(REPO, "old.zip").await.unwrap().panel.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stale_pending_is_processed_again() {
    let work = tempfile::tempdir().unwrap();
    let (catalog, blobs) = seed(
        REPO,
        &[("fresh.zip", date(2020, 1, 1)), ("stale.zip", date(2020, 1, 1))],
    )
    .await;
    for (name, age) in [("fresh.zip", chrono::Duration::hours(2)), ("stale.zip", chrono::Duration::hours(30))] {
        let mut artifact = catalog.artifact(REPO, name).await.unwrap();
        artifact.panel.set(labels::TASK_STATUS, "PENDING");
        artifact
            .panel
            .set(labels::TASK_FINISHED_TIME, format_timestamp(Utc::now() - age));
        catalog.insert(artifact).await;
    }
    let server = Arc::new(FakeAnalysisServer::new());

    let task = scan_task(builder(work.path()).build().unwrap(), &catalog, blobs, &server);
    let report = task.execute(&repo(), CancellationToken::new()).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(server.submitted_targets(), vec!["releases/stale.zip"]);
}

#[tokio::test(start_paused = true)]
async fn test_redo_failures_and_always_process() {
    let work = tempfile::tempdir().unwrap();
    let (catalog, blobs) = seed(REPO, &[("a.zip", date(2020, 1, 1)), ("b.zip", date(2020, 1, 1))]).await;
    let server = Arc::new(FakeAnalysisServer::new().reject("releases/b.zip"));

    let first = scan_task(builder(work.path()).build().unwrap(), &catalog, Arc::clone(&blobs), &server);
    let report = first.execute(&repo(), CancellationToken::new()).await.unwrap();
    assert_eq!((report.succeeded, report.failed), (1, 1));

    // 기본 설정: 둘 다 최신 상태
    let report = first.execute(&repo(), CancellationToken::new()).await.unwrap();
    assert_eq!(report.skipped, 2);

    let redo = scan_task(
        builder(work.path()).redo_failures(true).build().unwrap(),
        &catalog,
        Arc::clone(&blobs),
        &server,
    );
    let report = redo.execute(&repo(), CancellationToken::new()).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.submitted, 0);
    assert_eq!(report.failed, 1);

    let always = scan_task(
        builder(work.path()).always_process(true).build().unwrap(),
        &catalog,
        blobs,
        &server,
    );
    let report = always.execute(&repo(), CancellationToken::new()).await.unwrap();
    assert_eq!(report.skipped, 0);
    assert_eq!(report.examined, 2);
}

#[tokio::test(start_paused = true)]
async fn test_highest_counting_mode_keeps_top_severity() {
    let work = tempfile::tempdir().unwrap();
    let (catalog, blobs) = seed(REPO, &[("a.zip", date(2020, 1, 1))]).await;
    let server = Arc::new(FakeAnalysisServer::new().vulnerabilities(
        "releases/a.zip",
        &[Severity::High, Severity::Medium, Severity::High, Severity::Low],
    ));

    let task = scan_task(
        builder(work.path())
            .counting_mode(CountingMode::Highest)
            .build()
            .unwrap(),
        &catalog,
        blobs,
        &server,
    );
    task.execute(&repo(), CancellationToken::new()).await.unwrap();

    let (_, entry) = &entries(&catalog).await[0];
    assert_eq!(
        (entry.critical, entry.high, entry.medium, entry.low),
        (Some(0), Some(2), Some(0), Some(0))
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_keeps_earlier_pages() {
    let work = tempfile::tempdir().unwrap();
    let (catalog, blobs) = seed(
        REPO,
        &[("a.zip", date(2020, 1, 1)), ("b.zip", date(2020, 1, 1))],
    )
    .await;
    // 첫 페이지만 확인되고 두 번째 페이지는 응답 없음
    let server = Arc::new(FakeAnalysisServer::new().confirm_only(&["releases/a.zip"]));
    let task = scan_task(builder(work.path()).page_size(1).build().unwrap(), &catalog, blobs, &server);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(20)).await;
        trigger.cancel();
    });

    let err = task.execute(&repo(), cancel).await.unwrap_err();
    assert!(matches!(err, VaultscanError::Task(TaskError::Interrupted { .. })));

    let entries = entries(&catalog).await;
    assert_eq!(entries[0].1.status, Some(TaskStatus::Success));
    assert_eq!(entries[1].1.status, Some(TaskStatus::Failure));
    assert_eq!(entries[1].1.description.as_deref(), Some(INTERRUPTED));
    assert_status_invariant(&entries);
}

#[tokio::test(start_paused = true)]
async fn test_inspection_reports_missing_components() {
    let catalog = Arc::new(InMemoryCatalog::new());
    let maven = Repository::new("maven-central-mirror", PackageType::Maven);
    for (name, artifact_id) in [("com/acme/api-2.0.jar", "api"), ("com/acme/impl-2.0.jar", "impl")] {
        catalog
            .insert(
                Artifact::new(&maven.key, name, date(2021, 3, 1))
                    .without_blob()
                    .with_component(Component {
                        group: Some("com.acme".to_owned()),
                        name: artifact_id.to_owned(),
                        version: "2.0".to_owned(),
                    }),
            )
            .await;
    }
    let server = Arc::new(FakeAnalysisServer::new().without_component("com.acme:impl:2.0"));
    let config = InspectTaskConfigBuilder::new()
        .enabled(true)
        .name_patterns("*.jar")
        .server(server_config())
        .project_version("nightly")
        .poll_interval_ms(250)
        .build()
        .unwrap();
    let task = InspectionTask::new(config, Arc::clone(&catalog), connection(&server)).unwrap();

    let report = task.execute(&maven, CancellationToken::new()).await.unwrap();
    assert_eq!(server.graph_count(), 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.component_not_found, 1);

    let api = catalog.artifact(&maven.key, "com/acme/api-2.0.jar").await.unwrap();
    let entry = LedgerEntry::from_panel(&api.name, &api.panel).unwrap();
    assert_eq!(entry.project_name.as_deref(), Some("maven-central-mirror"));
    assert_eq!(entry.project_version.as_deref(), Some("nightly"));
    assert_eq!(entry.origin_id.as_deref(), Some("origin-com.acme:api:2.0"));
}

#[tokio::test(start_paused = true)]
async fn test_registry_runs_both_tasks_for_a_repository() {
    let work = tempfile::tempdir().unwrap();
    let (catalog, blobs) = seed(REPO, &[("a.zip", date(2020, 1, 1))]).await;
    let server = Arc::new(FakeAnalysisServer::new());

    let scan = scan_task(builder(work.path()).build().unwrap(), &catalog, blobs, &server);
    let inspect = InspectionTask::new(
        InspectTaskConfigBuilder::new()
            .enabled(true)
            .repositories(vec!["other".to_owned()])
            .name_patterns("*.zip")
            .server(server_config())
            .build()
            .unwrap(),
        Arc::clone(&catalog),
        connection(&server),
    )
    .unwrap();

    let mut registry = TaskRegistry::new();
    registry.register(Box::new(scan)).unwrap();
    registry.register(Box::new(inspect)).unwrap();
    assert_eq!(registry.applicable(&repo()).len(), 1);

    let outcomes = registry.run_for(&repo(), CancellationToken::new()).await;
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].result.is_ok());
}

#[tokio::test]
async fn test_file_system_catalog_end_to_end() {
    let root = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    for file in ["releases/app/app-1.0.zip", "releases/app/readme.txt"] {
        let path = root.path().join(file);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"PK\x03\x04").unwrap();
    }
    let catalog = Arc::new(FsCatalog::new(root.path()));
    let server = Arc::new(FakeAnalysisServer::new());
    let task = ScanTask::new(
        builder(work.path()).build().unwrap(),
        Arc::clone(&catalog),
        Arc::clone(&catalog),
        connection(&server),
    )
    .unwrap();

    let report = task.execute(&repo(), CancellationToken::new()).await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.skipped, 1);

    let reopened = FsCatalog::new(root.path());
    let state = reopened.load_state(REPO).await.unwrap();
    assert_eq!(
        state.panels["app/app-1.0.zip"].get(labels::TASK_STATUS),
        Some("SUCCESS")
    );

    let cleared = LedgerMaintenance::new(&reopened).clear_all(REPO).await.unwrap();
    assert_eq!(cleared, 1);
    assert!(reopened.load_state(REPO).await.unwrap().panels.is_empty());
}
