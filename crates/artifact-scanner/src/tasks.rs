//! 저장소 태스크 오케스트레이터
//!
//! [`ScanTask`]와 [`InspectionTask`]는 core의 [`RepositoryTask`] trait을 구현하여
//! 호스트가 저장소마다 한 번씩 호출합니다.
//!
//! # 스캔 흐름 (페이지 단위)
//!
//! ```text
//! CatalogCursor --> EligibilityFilter --> PageWorkDir + materialize
//!                                                  |
//!                                             Submitter --> PENDING
//!                                                  |
//!                                          CompletionWaiter
//!                                                  |
//!                               Complete: Reconciler / 그 외: 배치 전체 FAILURE
//! ```
//!
//! # 인스펙션 흐름 (저장소 단위)
//!
//! 전체 순회로 의존성 그래프를 만든 뒤 한 번 제출하고 한 번 기다립니다.
//!
//! 치명적 에러([`ScannerError::is_fatal`])만 실행을 중단시키며, 이 경우
//! 대기 중이던 아티팩트는 FAILURE로 남기고 `TaskError::Interrupted`를 반환합니다.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use vaultscan_core::error::{TaskError, VaultscanError};
use vaultscan_core::metrics as m;
use vaultscan_core::task::{RepositoryTask, TaskInfo, TaskKind, TaskReport};
use vaultscan_core::types::Repository;

use crate::blob::BlobStore;
use crate::catalog::{Artifact, CatalogCursor, CatalogStore};
use crate::config::{InspectTaskConfig, ScanTaskConfig};
use crate::connection::{ClientConnector, ServerConnection};
use crate::error::{ClientError, ScannerError};
use crate::filter::{EligibilityFilter, FilterMode, Verdict};
use crate::ledger::StatusLedger;
use crate::prepare::{
    DependencyGraph, ExternalId, PageWorkDir, inspection_identity, materialize,
};
use crate::reconcile::{ReconcileTally, Reconciler};
use crate::submit::{AWAITING_CONFIRMATION, GraphSubmission, Submitter};
use crate::waiter::{CompletionWaiter, WaitOutcome};

/// 스캔 태스크 이름
pub const SCAN_TASK_NAME: &str = "binary-scan";
/// 인스펙션 태스크 이름
pub const INSPECTION_TASK_NAME: &str = "inspection";

/// 취소로 중단된 아티팩트에 기록하는 설명
pub const INTERRUPTED: &str = "Interrupted before the analysis server confirmed processing";

// ─── 실행 상태 ───────────────────────────────────────────────────────

/// 한 번의 저장소 실행 동안 쓰는 원장과 보고서
struct RunState<'a, C> {
    ledger: StatusLedger<'a, C>,
    report: TaskReport,
    task: &'static str,
}

impl<'a, C: CatalogStore> RunState<'a, C> {
    fn new(catalog: &'a C, info: &TaskInfo, task: &'static str, repository: &Repository) -> Self {
        Self {
            ledger: StatusLedger::new(catalog),
            report: TaskReport::new(&info.name, &repository.key),
            task,
        }
    }

    fn count(&self, name: &'static str, n: usize) {
        if n > 0 {
            metrics::counter!(
                name,
                m::LABEL_TASK => self.task,
                m::LABEL_REPOSITORY => self.report.repository.clone()
            )
            .increment(n as u64);
        }
    }

    fn page(&mut self) {
        self.report.pages += 1;
        self.count(m::PAGES_FETCHED_TOTAL, 1);
    }

    fn examined(&mut self) {
        self.report.examined += 1;
        self.count(m::ARTIFACTS_EXAMINED_TOTAL, 1);
    }

    fn skipped(&mut self) {
        self.report.skipped += 1;
        self.count(m::ARTIFACTS_SKIPPED_TOTAL, 1);
    }

    fn submitted(&mut self, n: usize) {
        self.report.submitted += n;
        self.count(m::ARTIFACTS_SUBMITTED_TOTAL, n);
    }

    fn settled(&mut self, tally: ReconcileTally) {
        self.report.succeeded += tally.succeeded;
        self.report.failed += tally.failed;
        self.report.component_not_found += tally.component_not_found;
        self.count(m::ARTIFACTS_SUCCEEDED_TOTAL, tally.succeeded);
        self.count(m::ARTIFACTS_FAILED_TOTAL, tally.failed);
        self.count(m::ARTIFACTS_COMPONENT_NOT_FOUND_TOTAL, tally.component_not_found);
    }

    /// 아티팩트를 FAILURE로 기록합니다. 기록 실패는 로그만 남깁니다.
    async fn fail(&mut self, artifact: &mut Artifact, reason: &str) {
        warn!(
            repository = %artifact.repository,
            artifact = %artifact.name,
            error = reason,
            "artifact failed"
        );
        if let Err(e) = self.ledger.mark_failure(artifact, reason).await {
            warn!(artifact = %artifact.name, error = %e, "could not record failure");
        }
        self.report.failed += 1;
        self.count(m::ARTIFACTS_FAILED_TOTAL, 1);
    }

    /// 배치 전체를 같은 설명으로 FAILURE 처리합니다.
    async fn fail_all(&mut self, artifacts: &mut [Artifact], reason: &str) {
        for artifact in artifacts {
            self.fail(artifact, reason).await;
        }
    }

    /// 필터 판정. 처리 대상이면 `true`.
    async fn select(
        &mut self,
        filter: &EligibilityFilter,
        artifact: &mut Artifact,
        now: chrono::DateTime<Utc>,
    ) -> bool {
        self.examined();
        match filter.evaluate(artifact, now) {
            Ok(Verdict::Process(reason)) => {
                debug!(artifact = %artifact.name, ?reason, "artifact selected");
                true
            }
            Ok(Verdict::Skip(reason)) => {
                debug!(artifact = %artifact.name, %reason, "artifact skipped");
                self.skipped();
                false
            }
            Err(e) => {
                self.fail(artifact, &e.to_string()).await;
                false
            }
        }
    }
}

/// 치명적 에러를 호스트에 돌려줄 에러로 변환합니다.
fn abort(repository: &Repository, task: &str, err: ScannerError) -> VaultscanError {
    error!(repository = %repository.key, task, error = %err, "repository run aborted");
    match err {
        ScannerError::Config { .. } => err.into(),
        other => TaskError::Interrupted {
            repository: repository.key.clone(),
            reason: other.to_string(),
        }
        .into(),
    }
}

fn record_run_duration(task: &'static str, started: Instant) {
    metrics::histogram!(m::REPOSITORY_RUN_DURATION_SECONDS, m::LABEL_TASK => task)
        .record(started.elapsed().as_secs_f64());
}

fn cancelled(repository: &Repository) -> ScannerError {
    ScannerError::Cancelled(format!("run for '{}' cancelled", repository.key))
}

/// 거부 사유 중 인증 실패가 있으면 다음 실행에서 다시 연결하도록 연결을 무효화합니다.
async fn invalidate_on_auth_failure<'e, K: ClientConnector>(
    connection: &ServerConnection<K>,
    errors: impl IntoIterator<Item = &'e ClientError>,
) {
    if errors
        .into_iter()
        .any(|e| matches!(e, ClientError::Unauthorized(_)))
    {
        connection.invalidate().await;
    }
}

// ─── ScanTask ────────────────────────────────────────────────────────

/// 바이너리 스캔 태스크
pub struct ScanTask<C, B, K: ClientConnector> {
    info: TaskInfo,
    config: ScanTaskConfig,
    filter: EligibilityFilter,
    catalog: Arc<C>,
    blobs: Arc<B>,
    connection: Arc<ServerConnection<K>>,
}

impl<C, B, K> ScanTask<C, B, K>
where
    C: CatalogStore,
    B: BlobStore,
    K: ClientConnector,
{
    /// 설정을 검증하고 태스크를 생성합니다.
    pub fn new(
        config: ScanTaskConfig,
        catalog: Arc<C>,
        blobs: Arc<B>,
        connection: Arc<ServerConnection<K>>,
    ) -> Result<Self, ScannerError> {
        config.validate()?;
        let filter = EligibilityFilter::new(&config.selection, FilterMode::Scan)?;
        Ok(Self {
            info: TaskInfo {
                name: SCAN_TASK_NAME.to_owned(),
                description: "Uploads artifact content to the analysis server".to_owned(),
                kind: TaskKind::Scan,
            },
            config,
            filter,
            catalog,
            blobs,
            connection,
        })
    }

    pub fn config(&self) -> &ScanTaskConfig {
        &self.config
    }

    async fn run(
        &self,
        repository: &Repository,
        cancel: &CancellationToken,
    ) -> Result<TaskReport, ScannerError> {
        let client = self.connection.client().await?;
        let waiter = CompletionWaiter::new(
            self.config.completion_timeout(),
            self.config.poll_interval(),
        );
        let mut state = RunState::new(&*self.catalog, &self.info, "scan", repository);
        let mut cursor = CatalogCursor::new(
            &*self.catalog,
            &repository.key,
            self.config.selection.page_size,
        );

        info!(repository = %repository.key, task = %self.info.name, "scan run started");

        loop {
            if cancel.is_cancelled() {
                return Err(cancelled(repository));
            }
            let Some(page) = cursor.next_page().await? else {
                break;
            };
            state.page();
            info!(
                repository = %repository.key,
                page = state.report.pages,
                artifacts = page.items.len(),
                "processing page"
            );
            self.process_page(&*client, &waiter, &mut state, page.items, repository, cancel)
                .await?;
        }

        Ok(state.report)
    }

    async fn process_page(
        &self,
        client: &K::Client,
        waiter: &CompletionWaiter,
        state: &mut RunState<'_, C>,
        items: Vec<Artifact>,
        repository: &Repository,
        cancel: &CancellationToken,
    ) -> Result<(), ScannerError> {
        let now = Utc::now();
        let mut selected = Vec::new();
        for mut artifact in items {
            if state.select(&self.filter, &mut artifact, now).await {
                selected.push(artifact);
            }
        }
        if selected.is_empty() {
            return Ok(());
        }

        // drop 시 페이지 파일 전체 제거
        let work = PageWorkDir::create(&self.config.working_dir).await?;

        let mut targets = Vec::with_capacity(selected.len());
        let mut batch = Vec::with_capacity(selected.len());
        for (index, mut artifact) in selected.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(cancelled(repository));
            }
            match materialize(&*self.blobs, &artifact, &work, index, self.config.memory_mb).await {
                Ok(target) => {
                    targets.push(target);
                    batch.push(artifact);
                }
                Err(e) => state.fail(&mut artifact, &e.to_string()).await,
            }
        }
        if targets.is_empty() {
            return Ok(());
        }

        let submission = Submitter::new(client).submit_scan(&targets).await;
        invalidate_on_auth_failure(
            &self.connection,
            submission.rejected.iter().map(|r| &r.error),
        )
        .await;

        let mut in_flight = Vec::with_capacity(batch.len());
        let mut expected = Vec::with_capacity(batch.len());
        for (target, mut artifact) in targets.iter().zip(batch) {
            if let Some(rejected) = submission.rejected.iter().find(|r| r.name == target.name) {
                state.fail(&mut artifact, &rejected.error.to_string()).await;
                continue;
            }
            match state
                .ledger
                .mark_pending(&mut artifact, AWAITING_CONFIRMATION, Some(&target.identity))
                .await
            {
                Ok(()) => {
                    expected.push(target.name.clone());
                    in_flight.push(artifact);
                }
                Err(e) => state.fail(&mut artifact, &e.to_string()).await,
            }
        }
        if in_flight.is_empty() {
            return Ok(());
        }
        state.submitted(in_flight.len());

        let outcome = match waiter
            .await_completion(client, &submission.handle, &expected, cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                state.fail_all(&mut in_flight, INTERRUPTED).await;
                return Err(e);
            }
        };

        match outcome {
            WaitOutcome::Complete => {
                let tally = Reconciler::new(client, &*self.catalog, self.config.selection.counting_mode)
                    .reconcile_scan(&mut in_flight)
                    .await;
                state.settled(tally);
            }
            WaitOutcome::Partial { .. } | WaitOutcome::TimedOut => {
                state
                    .fail_all(&mut in_flight, &waiter.unconfirmed_message())
                    .await;
            }
        }

        drop(work);
        Ok(())
    }
}

impl<C, B, K> RepositoryTask for ScanTask<C, B, K>
where
    C: CatalogStore + 'static,
    B: BlobStore + 'static,
    K: ClientConnector,
{
    fn info(&self) -> &TaskInfo {
        &self.info
    }

    fn applies_to(&self, repository: &Repository) -> bool {
        self.config.covers(repository)
    }

    async fn execute(
        &self,
        repository: &Repository,
        cancel: CancellationToken,
    ) -> Result<TaskReport, VaultscanError> {
        let started = Instant::now();
        let result = self.run(repository, &cancel).await;
        record_run_duration("scan", started);
        match result {
            Ok(report) => Ok(report.finish()),
            Err(e) => Err(abort(repository, &self.info.name, e)),
        }
    }
}

// ─── InspectionTask ──────────────────────────────────────────────────

/// 인스펙션 태스크
pub struct InspectionTask<C, K: ClientConnector> {
    info: TaskInfo,
    config: InspectTaskConfig,
    filter: EligibilityFilter,
    catalog: Arc<C>,
    connection: Arc<ServerConnection<K>>,
}

impl<C, K> InspectionTask<C, K>
where
    C: CatalogStore,
    K: ClientConnector,
{
    /// 설정을 검증하고 태스크를 생성합니다.
    pub fn new(
        config: InspectTaskConfig,
        catalog: Arc<C>,
        connection: Arc<ServerConnection<K>>,
    ) -> Result<Self, ScannerError> {
        config.validate()?;
        let filter = EligibilityFilter::new(&config.selection, FilterMode::Inspection)?;
        Ok(Self {
            info: TaskInfo {
                name: INSPECTION_TASK_NAME.to_owned(),
                description: "Submits a dependency graph built from catalog metadata".to_owned(),
                kind: TaskKind::Inspection,
            },
            config,
            filter,
            catalog,
            connection,
        })
    }

    pub fn config(&self) -> &InspectTaskConfig {
        &self.config
    }

    async fn run(
        &self,
        repository: &Repository,
        cancel: &CancellationToken,
    ) -> Result<TaskReport, ScannerError> {
        let client = self.connection.client().await?;
        let mut state = RunState::new(&*self.catalog, &self.info, "inspection", repository);
        let identity = inspection_identity(repository, &self.config.project_version);
        let mut cursor = CatalogCursor::new(
            &*self.catalog,
            &repository.key,
            self.config.selection.page_size,
        );

        info!(
            repository = %repository.key,
            project = %identity.project_name,
            version = %identity.project_version,
            "inspection run started"
        );

        let mut graph = DependencyGraph::new();
        let mut members: Vec<(Artifact, ExternalId)> = Vec::new();
        let now = Utc::now();

        loop {
            if cancel.is_cancelled() {
                return Err(cancelled(repository));
            }
            let Some(page) = cursor.next_page().await? else {
                break;
            };
            state.page();
            for mut artifact in page.items {
                if !state.select(&self.filter, &mut artifact, now).await {
                    continue;
                }
                let external_id = artifact
                    .component
                    .as_ref()
                    .and_then(|c| ExternalId::from_component(repository.package_type, c));
                match external_id {
                    Some(id) => {
                        graph.add(id.clone(), &artifact.name);
                        members.push((artifact, id));
                    }
                    None => {
                        let err = ScannerError::ComponentUnknown {
                            artifact: artifact.name.clone(),
                        };
                        state.fail(&mut artifact, &err.to_string()).await;
                    }
                }
            }
        }

        if members.is_empty() {
            info!(repository = %repository.key, "nothing to inspect");
            return Ok(state.report);
        }

        let document = graph.into_document(identity.clone());
        let client = &*client;
        let handle = match Submitter::new(client).submit_graph(&document).await {
            GraphSubmission::Accepted(handle) => handle,
            GraphSubmission::Rejected(e) => {
                invalidate_on_auth_failure(&self.connection, [&e]).await;
                for (artifact, _) in members.iter_mut() {
                    state.fail(artifact, &e.to_string()).await;
                }
                return Ok(state.report);
            }
        };

        let mut in_flight = Vec::with_capacity(members.len());
        for (mut artifact, id) in members {
            match state
                .ledger
                .mark_pending(&mut artifact, AWAITING_CONFIRMATION, Some(&identity))
                .await
            {
                Ok(()) => in_flight.push((artifact, id)),
                Err(e) => state.fail(&mut artifact, &e.to_string()).await,
            }
        }
        if in_flight.is_empty() {
            return Ok(state.report);
        }
        state.submitted(in_flight.len());

        let waiter = CompletionWaiter::new(
            self.config.completion_timeout(),
            self.config.poll_interval(),
        );
        let expected = vec![document.unit_name()];
        let outcome = match waiter
            .await_completion(client, &handle, &expected, cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                for (artifact, _) in in_flight.iter_mut() {
                    state.fail(artifact, INTERRUPTED).await;
                }
                return Err(e);
            }
        };

        match outcome {
            WaitOutcome::Complete => {
                let tally = Reconciler::new(client, &*self.catalog, self.config.selection.counting_mode)
                    .reconcile_inspection(&identity, &mut in_flight)
                    .await;
                state.settled(tally);
            }
            WaitOutcome::Partial { .. } | WaitOutcome::TimedOut => {
                let message = waiter.unconfirmed_message();
                for (artifact, _) in in_flight.iter_mut() {
                    state.fail(artifact, &message).await;
                }
            }
        }

        Ok(state.report)
    }
}

impl<C, K> RepositoryTask for InspectionTask<C, K>
where
    C: CatalogStore + 'static,
    K: ClientConnector,
{
    fn info(&self) -> &TaskInfo {
        &self.info
    }

    fn applies_to(&self, repository: &Repository) -> bool {
        self.config.covers(repository)
    }

    async fn execute(
        &self,
        repository: &Repository,
        cancel: CancellationToken,
    ) -> Result<TaskReport, VaultscanError> {
        let started = Instant::now();
        let result = self.run(repository, &cancel).await;
        record_run_duration("inspection", started);
        match result {
            Ok(report) => Ok(report.finish()),
            Err(e) => Err(abort(repository, &self.info.name, e)),
        }
    }
}
