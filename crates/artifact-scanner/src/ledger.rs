//! 상태 원장 — 아티팩트별 영속 상태 머신
//!
//! 원장은 아티팩트 상태 패널 위에 고정 레이블로 기록됩니다.
//! 내부 로직은 타입이 있는 [`LedgerEntry`]를 사용하고, 평면 문자열 맵은
//! 저장소 경계([`StatusPanel`])에서만 다룹니다.
//!
//! # 상태 전이
//! ```text
//! (없음) ──submit──▶ PENDING ──reconcile──▶ SUCCESS | FAILURE | COMPONENT_NOT_FOUND
//!   any  ──error───▶ FAILURE
//! PENDING | COMPONENT_NOT_FOUND ──retry window 경과──▶ 재처리 대상
//! ```
//!
//! SUCCESS가 아닌 상태로 기록할 때는 항상 위험/정책 필드를 먼저 지웁니다.
//! 모든 기록은 패널 전체를 한 번에 쓰므로 중간 상태가 저장소에 남지 않습니다.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::catalog::{Artifact, CatalogCursor, CatalogStore, StatusPanel};
use crate::error::ScannerError;

/// 원장 레이블 키
pub mod labels {
    pub const TASK_STATUS: &str = "task_status";
    pub const STATUS_DESCRIPTION: &str = "status_description";
    pub const TASK_FINISHED_TIME: &str = "task_finished_time";
    pub const OVERALL_POLICY_STATUS: &str = "overall_policy_status";
    pub const POLICY_STATUS: &str = "policy_status";
    pub const CRITICAL_VULNERABILITIES: &str = "critical_vulnerabilities";
    pub const HIGH_VULNERABILITIES: &str = "high_vulnerabilities";
    pub const MEDIUM_VULNERABILITIES: &str = "medium_vulnerabilities";
    pub const LOW_VULNERABILITIES: &str = "low_vulnerabilities";
    pub const ANALYSIS_URL: &str = "analysis_url";
    pub const ORIGIN_ID: &str = "origin_id";
    pub const PROJECT_NAME: &str = "project_name";
    pub const PROJECT_VERSION: &str = "project_version";

    /// SUCCESS 외 상태에서 존재하면 안 되는 레이블
    pub const RISK: &[&str] = &[
        OVERALL_POLICY_STATUS,
        POLICY_STATUS,
        CRITICAL_VULNERABILITIES,
        HIGH_VULNERABILITIES,
        MEDIUM_VULNERABILITIES,
        LOW_VULNERABILITIES,
        ANALYSIS_URL,
    ];

    /// 원장이 관리하는 모든 레이블
    pub const ALL: &[&str] = &[
        TASK_STATUS,
        STATUS_DESCRIPTION,
        TASK_FINISHED_TIME,
        OVERALL_POLICY_STATUS,
        POLICY_STATUS,
        CRITICAL_VULNERABILITIES,
        HIGH_VULNERABILITIES,
        MEDIUM_VULNERABILITIES,
        LOW_VULNERABILITIES,
        ANALYSIS_URL,
        ORIGIN_ID,
        PROJECT_NAME,
        PROJECT_VERSION,
    ];
}

/// 원장에 기록하는 시각 형식 (RFC 3339, 밀리초, UTC)
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// 태스크 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// 제출됨, 서버 확인 대기
    Pending,
    /// 결과 반영 완료
    Success,
    /// 실패
    Failure,
    /// 인스펙션 결과에서 컴포넌트를 찾지 못함
    ComponentNotFound,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::ComponentNotFound => "COMPONENT_NOT_FOUND",
        }
    }

    /// 저장된 문자열을 파싱합니다. 알 수 없는 값이면 `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "SUCCESS" => Some(Self::Success),
            "FAILURE" => Some(Self::Failure),
            "COMPONENT_NOT_FOUND" => Some(Self::ComponentNotFound),
            _ => None,
        }
    }

    /// 재시도 대기 시간이 적용되는 상태인지
    pub fn is_retryable_after_window(&self) -> bool {
        matches!(self, Self::Pending | Self::ComponentNotFound)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 심각도별 취약점 개수와 정책 결과
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskSummary {
    pub critical: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    /// 프로젝트 버전 전체 정책 상태
    pub overall_policy_status: String,
    /// 아티팩트 단위 집계 정책 상태
    pub policy_status: String,
    /// 분석 결과 URL
    pub analysis_url: Option<String>,
    /// 분석 서버 측 원본 식별자
    pub origin_id: Option<String>,
}

/// 분석 서버 프로젝트 식별 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectIdentity {
    pub project_name: String,
    pub project_version: String,
}

/// 타입이 있는 원장 항목
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub status: Option<TaskStatus>,
    pub description: Option<String>,
    pub finished: Option<DateTime<Utc>>,
    pub overall_policy_status: Option<String>,
    pub policy_status: Option<String>,
    pub critical: Option<u64>,
    pub high: Option<u64>,
    pub medium: Option<u64>,
    pub low: Option<u64>,
    pub analysis_url: Option<String>,
    pub origin_id: Option<String>,
    pub project_name: Option<String>,
    pub project_version: Option<String>,
}

impl LedgerEntry {
    /// 패널에서 항목을 읽습니다.
    ///
    /// 상태, 시각, 개수 값이 해석되지 않으면 `LedgerCorrupt`를 반환합니다.
    pub fn from_panel(artifact: &str, panel: &StatusPanel) -> Result<Self, ScannerError> {
        let corrupt = |label: &str, value: &str| ScannerError::LedgerCorrupt {
            artifact: artifact.to_owned(),
            label: label.to_owned(),
            value: value.to_owned(),
        };

        let status = match panel.get(labels::TASK_STATUS) {
            Some(raw) => {
                Some(TaskStatus::parse(raw).ok_or_else(|| corrupt(labels::TASK_STATUS, raw))?)
            }
            None => None,
        };

        let finished = match panel.get(labels::TASK_FINISHED_TIME) {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|_| corrupt(labels::TASK_FINISHED_TIME, raw))?,
            ),
            None => None,
        };

        let count = |label: &str| -> Result<Option<u64>, ScannerError> {
            panel
                .get(label)
                .map(|raw| raw.parse::<u64>().map_err(|_| corrupt(label, raw)))
                .transpose()
        };
        let text = |label: &str| panel.get(label).map(str::to_owned);

        Ok(Self {
            status,
            description: text(labels::STATUS_DESCRIPTION),
            finished,
            overall_policy_status: text(labels::OVERALL_POLICY_STATUS),
            policy_status: text(labels::POLICY_STATUS),
            critical: count(labels::CRITICAL_VULNERABILITIES)?,
            high: count(labels::HIGH_VULNERABILITIES)?,
            medium: count(labels::MEDIUM_VULNERABILITIES)?,
            low: count(labels::LOW_VULNERABILITIES)?,
            analysis_url: text(labels::ANALYSIS_URL),
            origin_id: text(labels::ORIGIN_ID),
            project_name: text(labels::PROJECT_NAME),
            project_version: text(labels::PROJECT_VERSION),
        })
    }

    /// 원장 레이블만 패널에 반영합니다. 원장 밖의 키는 건드리지 않습니다.
    pub fn apply_to(&self, panel: &mut StatusPanel) {
        fn put(panel: &mut StatusPanel, label: &str, value: Option<String>) {
            match value {
                Some(v) => panel.set(label, v),
                None => {
                    panel.remove(label);
                }
            }
        }

        put(panel, labels::TASK_STATUS, self.status.map(|s| s.as_str().to_owned()));
        put(panel, labels::STATUS_DESCRIPTION, self.description.clone());
        put(panel, labels::TASK_FINISHED_TIME, self.finished.map(format_timestamp));
        put(panel, labels::OVERALL_POLICY_STATUS, self.overall_policy_status.clone());
        put(panel, labels::POLICY_STATUS, self.policy_status.clone());
        put(panel, labels::CRITICAL_VULNERABILITIES, self.critical.map(|n| n.to_string()));
        put(panel, labels::HIGH_VULNERABILITIES, self.high.map(|n| n.to_string()));
        put(panel, labels::MEDIUM_VULNERABILITIES, self.medium.map(|n| n.to_string()));
        put(panel, labels::LOW_VULNERABILITIES, self.low.map(|n| n.to_string()));
        put(panel, labels::ANALYSIS_URL, self.analysis_url.clone());
        put(panel, labels::ORIGIN_ID, self.origin_id.clone());
        put(panel, labels::PROJECT_NAME, self.project_name.clone());
        put(panel, labels::PROJECT_VERSION, self.project_version.clone());
    }

    /// 위험/정책 필드를 모두 지웁니다.
    pub fn clear_risk(&mut self) {
        self.overall_policy_status = None;
        self.policy_status = None;
        self.critical = None;
        self.high = None;
        self.medium = None;
        self.low = None;
        self.analysis_url = None;
    }

    /// 위험/정책 필드가 하나라도 있는지
    pub fn has_risk(&self) -> bool {
        self.overall_policy_status.is_some()
            || self.policy_status.is_some()
            || self.critical.is_some()
            || self.high.is_some()
            || self.medium.is_some()
            || self.low.is_some()
            || self.analysis_url.is_some()
    }
}

/// 상태 원장
///
/// 모든 기록은 카탈로그 저장소에 즉시 영속화되고, 성공한 경우에만
/// 호출자가 가진 아티팩트 스냅샷에 반영됩니다.
pub struct StatusLedger<'a, C> {
    catalog: &'a C,
}

impl<'a, C: CatalogStore> StatusLedger<'a, C> {
    pub fn new(catalog: &'a C) -> Self {
        Self { catalog }
    }

    /// 레이블 값을 읽습니다.
    pub fn get<'b>(&self, artifact: &'b Artifact, label: &str) -> Option<&'b str> {
        artifact.panel.get(label)
    }

    /// 레이블 값을 기록합니다.
    pub async fn set(
        &self,
        artifact: &mut Artifact,
        label: &str,
        value: impl Into<String>,
    ) -> Result<(), ScannerError> {
        let mut panel = artifact.panel.clone();
        panel.set(label, value);
        self.persist(artifact, panel).await
    }

    /// 패널 전체를 제거합니다.
    pub async fn clear_all(&self, artifact: &mut Artifact) -> Result<(), ScannerError> {
        self.persist(artifact, StatusPanel::new()).await
    }

    /// 타입이 있는 원장 항목을 읽습니다.
    pub fn entry(&self, artifact: &Artifact) -> Result<LedgerEntry, ScannerError> {
        LedgerEntry::from_panel(&artifact.name, &artifact.panel)
    }

    /// 현재 상태를 읽습니다. 저장된 값이 잘못되었으면 에러를 반환합니다.
    pub fn get_status(&self, artifact: &Artifact) -> Result<Option<TaskStatus>, ScannerError> {
        match artifact.panel.get(labels::TASK_STATUS) {
            Some(raw) => TaskStatus::parse(raw)
                .map(Some)
                .ok_or_else(|| ScannerError::LedgerCorrupt {
                    artifact: artifact.name.clone(),
                    label: labels::TASK_STATUS.to_owned(),
                    value: raw.to_owned(),
                }),
            None => Ok(None),
        }
    }

    /// PENDING으로 기록합니다.
    pub async fn mark_pending(
        &self,
        artifact: &mut Artifact,
        description: &str,
        identity: Option<&ProjectIdentity>,
    ) -> Result<(), ScannerError> {
        let mut entry = self.base_entry(artifact, TaskStatus::Pending, description);
        if let Some(identity) = identity {
            entry.project_name = Some(identity.project_name.clone());
            entry.project_version = Some(identity.project_version.clone());
        }
        self.write_entry(artifact, entry).await
    }

    /// 위험 요약과 함께 SUCCESS로 기록합니다.
    pub async fn mark_success(
        &self,
        artifact: &mut Artifact,
        risk: &RiskSummary,
        description: &str,
    ) -> Result<(), ScannerError> {
        let mut entry = self.base_entry(artifact, TaskStatus::Success, description);
        entry.critical = Some(risk.critical);
        entry.high = Some(risk.high);
        entry.medium = Some(risk.medium);
        entry.low = Some(risk.low);
        entry.overall_policy_status = Some(risk.overall_policy_status.clone());
        entry.policy_status = Some(risk.policy_status.clone());
        entry.analysis_url = risk.analysis_url.clone();
        if risk.origin_id.is_some() {
            entry.origin_id = risk.origin_id.clone();
        }
        self.write_entry(artifact, entry).await
    }

    /// FAILURE로 기록합니다.
    pub async fn mark_failure(
        &self,
        artifact: &mut Artifact,
        description: &str,
    ) -> Result<(), ScannerError> {
        let entry = self.base_entry(artifact, TaskStatus::Failure, description);
        self.write_entry(artifact, entry).await
    }

    /// COMPONENT_NOT_FOUND로 기록합니다.
    pub async fn mark_component_not_found(
        &self,
        artifact: &mut Artifact,
        description: &str,
    ) -> Result<(), ScannerError> {
        let entry = self.base_entry(artifact, TaskStatus::ComponentNotFound, description);
        self.write_entry(artifact, entry).await
    }

    /// 식별 필드는 유지하고 위험 필드는 지운 새 항목을 만듭니다.
    ///
    /// 기존 패널이 손상되어 있으면 식별 필드 없이 새로 시작합니다.
    fn base_entry(&self, artifact: &Artifact, status: TaskStatus, description: &str) -> LedgerEntry {
        let mut entry = match self.entry(artifact) {
            Ok(existing) => LedgerEntry {
                origin_id: existing.origin_id,
                project_name: existing.project_name,
                project_version: existing.project_version,
                ..LedgerEntry::default()
            },
            Err(e) => {
                debug!(artifact = %artifact.name, error = %e, "overwriting corrupt ledger entry");
                LedgerEntry::default()
            }
        };
        entry.clear_risk();
        entry.status = Some(status);
        entry.description = Some(description.to_owned());
        entry.finished = Some(Utc::now());
        entry
    }

    async fn write_entry(
        &self,
        artifact: &mut Artifact,
        entry: LedgerEntry,
    ) -> Result<(), ScannerError> {
        let mut panel = artifact.panel.clone();
        entry.apply_to(&mut panel);
        self.persist(artifact, panel).await?;
        debug!(
            repository = %artifact.repository,
            artifact = %artifact.name,
            status = ?entry.status,
            "ledger updated"
        );
        Ok(())
    }

    async fn persist(&self, artifact: &mut Artifact, panel: StatusPanel) -> Result<(), ScannerError> {
        self.catalog
            .write_panel(&artifact.repository, &artifact.id, &panel)
            .await
            .map_err(|e| match e {
                ScannerError::Ledger { .. } => e,
                other => ScannerError::Ledger {
                    artifact: artifact.name.clone(),
                    reason: other.to_string(),
                },
            })?;
        artifact.panel = panel;
        Ok(())
    }
}

// ─── LedgerMaintenance ───────────────────────────────────────────────

/// 저장소 단위 원장 유지보수
pub struct LedgerMaintenance<'a, C> {
    catalog: &'a C,
    page_size: usize,
}

impl<'a, C: CatalogStore> LedgerMaintenance<'a, C> {
    pub fn new(catalog: &'a C) -> Self {
        Self {
            catalog,
            page_size: vaultscan_core::config::DEFAULT_PAGE_SIZE,
        }
    }

    /// 순회 페이지 크기를 설정합니다.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// 저장소의 모든 상태 패널을 제거합니다. 제거한 수를 반환합니다.
    pub async fn clear_all(&self, repository: &str) -> Result<usize, ScannerError> {
        let cleared = self.clear_where(repository, |_| true).await?;
        info!(repository, cleared, "removed all status panels");
        Ok(cleared)
    }

    /// FAILURE 상태 패널을 제거해 다음 실행에서 재처리되게 합니다.
    pub async fn reset_failures(&self, repository: &str) -> Result<usize, ScannerError> {
        let cleared = self
            .clear_where(repository, |entry| {
                entry.is_some_and(|e| e.status == Some(TaskStatus::Failure))
            })
            .await?;
        info!(repository, cleared, "reset failed artifacts");
        Ok(cleared)
    }

    /// 재시도 대기 시간보다 오래된 PENDING 패널을 제거합니다.
    pub async fn reset_stale_pending(
        &self,
        repository: &str,
        now: DateTime<Utc>,
        window: chrono::Duration,
    ) -> Result<usize, ScannerError> {
        let cleared = self
            .clear_where(repository, |entry| {
                entry.is_some_and(|e| {
                    e.status == Some(TaskStatus::Pending)
                        && e.finished
                            .is_none_or(|f| f.checked_add_signed(window).is_none_or(|due| due < now))
                })
            })
            .await?;
        info!(repository, cleared, "reset stale pending artifacts");
        Ok(cleared)
    }

    /// 저장소의 모든 원장 항목을 이름 순으로 읽습니다.
    ///
    /// 손상된 항목은 `Err`로 남기고 순회는 계속합니다.
    pub async fn entries(
        &self,
        repository: &str,
    ) -> Result<Vec<(Artifact, Result<LedgerEntry, ScannerError>)>, ScannerError> {
        let mut cursor = CatalogCursor::new(self.catalog, repository, self.page_size);
        let mut out = Vec::new();
        while let Some(page) = cursor.next_page().await? {
            for artifact in page.items {
                let entry = LedgerEntry::from_panel(&artifact.name, &artifact.panel);
                out.push((artifact, entry));
            }
        }
        Ok(out)
    }

    async fn clear_where<F>(&self, repository: &str, predicate: F) -> Result<usize, ScannerError>
    where
        F: Fn(Option<&LedgerEntry>) -> bool,
    {
        let ledger = StatusLedger::new(self.catalog);
        let mut cursor = CatalogCursor::new(self.catalog, repository, self.page_size);
        let mut cleared = 0;

        while let Some(page) = cursor.next_page().await? {
            for mut artifact in page.items {
                if artifact.panel.is_empty() {
                    continue;
                }
                let entry = LedgerEntry::from_panel(&artifact.name, &artifact.panel).ok();
                if predicate(entry.as_ref()) {
                    ledger.clear_all(&mut artifact).await?;
                    cleared += 1;
                }
            }
        }
        Ok(cleared)
    }
}
