//! 태스크 시스템 — 저장소 태스크 등록과 디스패치
//!
//! [`RepositoryTask`]는 호스트 프레임워크가 저장소마다 호출하는 단위 작업입니다.
//! `applies_to`로 대상 저장소를 고르고 `execute`로 한 번의 저장소 실행을 수행합니다.
//!
//! [`TaskRegistry`]는 태스크의 등록, 해제, 저장소 단위 디스패치를 담당합니다.
//!
//! # 디스패치 흐름
//! ```text
//! Repository → TaskRegistry::run_for() → [applies_to?] → execute() → TaskReport
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{TaskError, VaultscanError};
use crate::types::Repository;

/// `Send` 가능한 박싱된 Future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ─── TaskKind ────────────────────────────────────────────────────────

/// 태스크 유형
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    /// 바이너리 스캔 (아티팩트 내용을 분석 서버로 전송)
    Scan,
    /// 인스펙션 (메타데이터로 의존성 그래프를 구성해 전송)
    Inspection,
    /// 사용자 정의 태스크
    Custom(String),
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scan => write!(f, "scan"),
            Self::Inspection => write!(f, "inspection"),
            Self::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

// ─── TaskInfo ────────────────────────────────────────────────────────

/// 태스크 메타데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    /// 태스크 고유 이름 (예: `"binary-scan"`)
    pub name: String,
    /// 태스크 설명
    pub description: String,
    /// 태스크 유형
    pub kind: TaskKind,
}

// ─── TaskReport ──────────────────────────────────────────────────────

/// 저장소 한 번 실행의 결과 요약
///
/// 아티팩트별 결과는 상태 원장에 남고, 이 보고서는 집계만 담습니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    /// 실행 고유 ID
    pub run_id: String,
    /// 태스크 이름
    pub task: String,
    /// 저장소 키
    pub repository: String,
    /// 조회한 페이지 수 (빈 종료 페이지 제외)
    pub pages: usize,
    /// 검사한 아티팩트 수
    pub examined: usize,
    /// 필터에서 제외된 아티팩트 수
    pub skipped: usize,
    /// 분석 서버로 제출된 아티팩트 수
    pub submitted: usize,
    /// SUCCESS로 기록된 아티팩트 수
    pub succeeded: usize,
    /// FAILURE로 기록된 아티팩트 수
    pub failed: usize,
    /// COMPONENT_NOT_FOUND로 기록된 아티팩트 수
    pub component_not_found: usize,
    /// 시작 시각
    pub started_at: DateTime<Utc>,
    /// 종료 시각
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskReport {
    /// 빈 보고서를 생성합니다.
    pub fn new(task: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            task: task.into(),
            repository: repository.into(),
            pages: 0,
            examined: 0,
            skipped: 0,
            submitted: 0,
            succeeded: 0,
            failed: 0,
            component_not_found: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// 종료 시각을 기록합니다.
    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    /// 결과 상태가 기록된 아티팩트 수를 반환합니다.
    pub fn settled(&self) -> usize {
        self.succeeded + self.failed + self.component_not_found
    }
}

impl fmt::Display for TaskReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}: examined={} skipped={} submitted={} succeeded={} failed={} not_found={}",
            self.task,
            self.repository,
            self.examined,
            self.skipped,
            self.submitted,
            self.succeeded,
            self.failed,
            self.component_not_found,
        )
    }
}

// ─── RepositoryTask Trait ────────────────────────────────────────────

/// 저장소 단위 태스크 trait
///
/// 호스트의 스케줄링은 범위 밖이며, 호스트는 이 trait만 호출합니다.
///
/// # 취소
///
/// `cancel`은 협력적 취소 신호입니다. 구현체는 대기 지점과 아티팩트 사이에서
/// 이를 확인하고, 진행 중인 아티팩트를 결정적인 상태로 남긴 뒤
/// `TaskError::Interrupted`를 반환해야 합니다.
pub trait RepositoryTask: Send + Sync {
    /// 태스크 메타데이터를 반환합니다.
    fn info(&self) -> &TaskInfo;

    /// 이 태스크가 해당 저장소를 처리하는지 반환합니다.
    fn applies_to(&self, repository: &Repository) -> bool;

    /// 저장소 한 번 실행을 수행합니다.
    fn execute(
        &self,
        repository: &Repository,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<TaskReport, VaultscanError>> + Send;
}

// ─── DynRepositoryTask Trait ─────────────────────────────────────────

/// dyn-compatible 태스크 trait
///
/// `RepositoryTask`는 RPITIT를 사용하므로 `dyn RepositoryTask`가 불가합니다.
/// `DynRepositoryTask`는 `BoxFuture`를 반환하여 레지스트리에서 동적으로 관리됩니다.
pub trait DynRepositoryTask: Send + Sync {
    /// 태스크 메타데이터를 반환합니다.
    fn info(&self) -> &TaskInfo;

    /// 이 태스크가 해당 저장소를 처리하는지 반환합니다.
    fn applies_to(&self, repository: &Repository) -> bool;

    /// 저장소 한 번 실행을 수행합니다.
    fn execute<'a>(
        &'a self,
        repository: &'a Repository,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<TaskReport, VaultscanError>>;
}

/// RepositoryTask를 구현한 타입은 자동으로 DynRepositoryTask도 구현됩니다.
impl<T: RepositoryTask> DynRepositoryTask for T {
    fn info(&self) -> &TaskInfo {
        RepositoryTask::info(self)
    }

    fn applies_to(&self, repository: &Repository) -> bool {
        RepositoryTask::applies_to(self, repository)
    }

    fn execute<'a>(
        &'a self,
        repository: &'a Repository,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<TaskReport, VaultscanError>> {
        Box::pin(RepositoryTask::execute(self, repository, cancel))
    }
}

// ─── TaskRegistry ────────────────────────────────────────────────────

/// 태스크 하나의 실행 결과
#[derive(Debug)]
pub struct TaskOutcome {
    /// 태스크 이름
    pub task: String,
    /// 실행 결과
    pub result: Result<TaskReport, VaultscanError>,
}

/// 태스크 레지스트리
///
/// 등록 순서가 보존되며, 저장소 디스패치도 등록 순서대로 수행합니다.
///
/// # 사용 예시
/// ```ignore
/// let mut registry = TaskRegistry::new();
/// registry.register(Box::new(scan_task))?;
/// registry.register(Box::new(inspection_task))?;
///
/// let outcomes = registry.run_for(&repository, cancel.clone()).await;
/// ```
pub struct TaskRegistry {
    tasks: Vec<Box<dyn DynRepositoryTask>>,
}

impl TaskRegistry {
    /// 빈 레지스트리를 생성합니다.
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// 태스크를 등록합니다.
    ///
    /// 동일한 이름의 태스크가 이미 등록되어 있으면 에러를 반환합니다.
    pub fn register(&mut self, task: Box<dyn DynRepositoryTask>) -> Result<(), VaultscanError> {
        let name = task.info().name.clone();
        if self.tasks.iter().any(|t| t.info().name == name) {
            return Err(TaskError::AlreadyRegistered { name }.into());
        }
        self.tasks.push(task);
        Ok(())
    }

    /// 태스크를 해제하고 소유권을 반환합니다.
    pub fn unregister(&mut self, name: &str) -> Result<Box<dyn DynRepositoryTask>, VaultscanError> {
        let pos = self.tasks.iter().position(|t| t.info().name == name);
        match pos {
            Some(idx) => Ok(self.tasks.remove(idx)),
            None => Err(TaskError::NotFound {
                name: name.to_owned(),
            }
            .into()),
        }
    }

    /// 이름으로 태스크를 조회합니다.
    pub fn get(&self, name: &str) -> Option<&dyn DynRepositoryTask> {
        self.tasks
            .iter()
            .find(|t| t.info().name == name)
            .map(|t| t.as_ref())
    }

    /// 등록된 태스크 수를 반환합니다.
    pub fn count(&self) -> usize {
        self.tasks.len()
    }

    /// 등록된 모든 태스크의 정보를 반환합니다.
    pub fn list(&self) -> Vec<&TaskInfo> {
        self.tasks.iter().map(|t| t.info()).collect()
    }

    /// 해당 저장소에 적용되는 태스크 정보를 반환합니다.
    pub fn applicable(&self, repository: &Repository) -> Vec<&TaskInfo> {
        self.tasks
            .iter()
            .filter(|t| t.applies_to(repository))
            .map(|t| t.info())
            .collect()
    }

    /// 저장소에 적용되는 모든 태스크를 등록 순서대로 실행합니다.
    ///
    /// 한 태스크의 실패는 다음 태스크 실행을 막지 않습니다.
    /// 취소 신호가 들어오면 남은 태스크는 시작하지 않습니다.
    pub async fn run_for(
        &self,
        repository: &Repository,
        cancel: CancellationToken,
    ) -> Vec<TaskOutcome> {
        let mut outcomes = Vec::new();

        for task in &self.tasks {
            if !task.applies_to(repository) {
                continue;
            }
            if cancel.is_cancelled() {
                warn!(
                    repository = %repository.key,
                    task = %task.info().name,
                    "cancellation requested, remaining tasks not started"
                );
                break;
            }

            let name = task.info().name.clone();
            info!(repository = %repository.key, task = %name, "running repository task");
            let result = task.execute(repository, cancel.clone()).await;
            match &result {
                Ok(report) => info!(report = %report, "repository task finished"),
                Err(e) => warn!(repository = %repository.key, task = %name, error = %e, "repository task aborted"),
            }
            outcomes.push(TaskOutcome { task: name, result });
        }

        outcomes
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::types::PackageType;

    /// 테스트용 Mock 태스크
    struct MockTask {
        info: TaskInfo,
        only: Option<PackageType>,
        fail: bool,
        runs: AtomicUsize,
    }

    impl MockTask {
        fn new(name: &str) -> Self {
            Self {
                info: TaskInfo {
                    name: name.to_owned(),
                    description: format!("Mock task: {name}"),
                    kind: TaskKind::Custom("mock".to_owned()),
                },
                only: None,
                fail: false,
                runs: AtomicUsize::new(0),
            }
        }

        fn only(mut self, package_type: PackageType) -> Self {
            self.only = Some(package_type);
            self
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    impl RepositoryTask for MockTask {
        fn info(&self) -> &TaskInfo {
            &self.info
        }

        fn applies_to(&self, repository: &Repository) -> bool {
            self.only.is_none_or(|t| t == repository.package_type)
        }

        async fn execute(
            &self,
            repository: &Repository,
            _cancel: CancellationToken,
        ) -> Result<TaskReport, VaultscanError> {
            self.runs.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                return Err(TaskError::Interrupted {
                    repository: repository.key.clone(),
                    reason: "mock failure".to_owned(),
                }
                .into());
            }
            Ok(TaskReport::new(&self.info.name, &repository.key).finish())
        }
    }

    fn maven_repo() -> Repository {
        Repository::new("maven-releases", PackageType::Maven)
    }

    #[test]
    fn task_kind_display() {
        assert_eq!(TaskKind::Scan.to_string(), "scan");
        assert_eq!(TaskKind::Inspection.to_string(), "inspection");
        assert_eq!(TaskKind::Custom("x".to_owned()).to_string(), "custom:x");
    }

    #[test]
    fn register_rejects_duplicate_names() {
        let mut registry = TaskRegistry::new();
        registry.register(Box::new(MockTask::new("a"))).unwrap();
        let err = registry.register(Box::new(MockTask::new("a"))).unwrap_err();
        assert!(matches!(
            err,
            VaultscanError::Task(TaskError::AlreadyRegistered { .. })
        ));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn unregister_returns_task() {
        let mut registry = TaskRegistry::new();
        registry.register(Box::new(MockTask::new("a"))).unwrap();
        let task = registry.unregister("a").unwrap();
        assert_eq!(task.info().name, "a");
        assert_eq!(registry.count(), 0);
        assert!(registry.unregister("a").is_err());
    }

    #[test]
    fn applicable_filters_by_repository() {
        let mut registry = TaskRegistry::new();
        registry
            .register(Box::new(MockTask::new("maven-only").only(PackageType::Maven)))
            .unwrap();
        registry
            .register(Box::new(MockTask::new("npm-only").only(PackageType::Npm)))
            .unwrap();

        let names: Vec<_> = registry
            .applicable(&maven_repo())
            .iter()
            .map(|i| i.name.clone())
            .collect();
        assert_eq!(names, vec!["maven-only"]);
    }

    #[tokio::test]
    async fn run_for_isolates_task_failures() {
        let mut registry = TaskRegistry::new();
        registry
            .register(Box::new(MockTask::new("broken").failing()))
            .unwrap();
        registry.register(Box::new(MockTask::new("ok"))).unwrap();

        let outcomes = registry
            .run_for(&maven_repo(), CancellationToken::new())
            .await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].result.is_err());
        assert!(outcomes[1].result.is_ok());
    }

    #[tokio::test]
    async fn run_for_skips_non_applicable_tasks() {
        let mut registry = TaskRegistry::new();
        registry
            .register(Box::new(MockTask::new("npm-only").only(PackageType::Npm)))
            .unwrap();

        let outcomes = registry
            .run_for(&maven_repo(), CancellationToken::new())
            .await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn run_for_stops_when_cancelled() {
        let mut registry = TaskRegistry::new();
        registry.register(Box::new(MockTask::new("a"))).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcomes = registry.run_for(&maven_repo(), cancel).await;
        assert!(outcomes.is_empty());
    }

    #[test]
    fn report_settled_counts() {
        let mut report = TaskReport::new("scan", "repo");
        report.succeeded = 2;
        report.failed = 1;
        report.component_not_found = 1;
        assert_eq!(report.settled(), 4);
        assert!(report.finished_at.is_none());
        assert!(report.finish().finished_at.is_some());
    }
}
