//! 결과 반영 — 분석 결과를 원장에 기록
//!
//! 완료가 확인된 배치에 대해 취약점과 정책 상태를 조회해 SUCCESS로 기록합니다.
//! 아티팩트 하나의 실패는 그 아티팩트만 FAILURE로 남기고 나머지는 계속 진행합니다.

use tracing::{info, warn};

use vaultscan_core::types::Severity;

use crate::catalog::{Artifact, CatalogStore};
use crate::client::{AnalysisClient, ProjectVersionView, Vulnerability};
use crate::config::CountingMode;
use crate::error::{ClientError, ScannerError};
use crate::ledger::{ProjectIdentity, RiskSummary, StatusLedger};
use crate::prepare::{ExternalId, scan_identity};

/// SUCCESS 기록 시 설명
pub const RESULTS_RECORDED: &str = "Analysis results recorded";

/// 심각도별 개수
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeverityCounts {
    pub critical: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
}

impl SeverityCounts {
    fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
        }
    }

    /// 존재하는 가장 높은 심각도만 남깁니다.
    fn keep_highest(self) -> Self {
        if self.critical > 0 {
            Self {
                critical: self.critical,
                ..Self::default()
            }
        } else if self.high > 0 {
            Self {
                high: self.high,
                ..Self::default()
            }
        } else if self.medium > 0 {
            Self {
                medium: self.medium,
                ..Self::default()
            }
        } else {
            Self {
                low: self.low,
                ..Self::default()
            }
        }
    }

    fn into_risk(
        self,
        overall_policy_status: String,
        policy_status: String,
        analysis_url: Option<String>,
        origin_id: Option<String>,
    ) -> RiskSummary {
        RiskSummary {
            critical: self.critical,
            high: self.high,
            medium: self.medium,
            low: self.low,
            overall_policy_status,
            policy_status,
            analysis_url,
            origin_id,
        }
    }
}

/// 취약점 목록을 심각도별로 집계합니다.
pub fn aggregate(vulnerabilities: &[Vulnerability], mode: CountingMode) -> SeverityCounts {
    let mut counts = SeverityCounts::default();
    for v in vulnerabilities {
        counts.add(v.severity);
    }
    match mode {
        CountingMode::Sum => counts,
        CountingMode::Highest => counts.keep_highest(),
    }
}

/// 배치 반영 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileTally {
    pub succeeded: usize,
    pub failed: usize,
    pub component_not_found: usize,
}

enum Settled {
    Success(RiskSummary),
    ComponentNotFound(String),
}

/// 결과 반영기
pub struct Reconciler<'a, A, C> {
    client: &'a A,
    ledger: StatusLedger<'a, C>,
    mode: CountingMode,
}

impl<'a, A: AnalysisClient, C: CatalogStore> Reconciler<'a, A, C> {
    pub fn new(client: &'a A, catalog: &'a C, mode: CountingMode) -> Self {
        Self {
            client,
            ledger: StatusLedger::new(catalog),
            mode,
        }
    }

    /// 스캔 배치를 반영합니다. 아티팩트마다 자기 프로젝트 버전을 조회합니다.
    pub async fn reconcile_scan(&self, artifacts: &mut [Artifact]) -> ReconcileTally {
        let mut tally = ReconcileTally::default();
        for artifact in artifacts.iter_mut() {
            let identity = scan_identity(artifact);
            let result = self.scan_risk(&identity).await.map(Settled::Success);
            self.settle(artifact, result, &mut tally).await;
        }
        info!(
            succeeded = tally.succeeded,
            failed = tally.failed,
            "scan batch reconciled"
        );
        tally
    }

    /// 인스펙션 결과를 반영합니다.
    ///
    /// 프로젝트 버전과 전체 정책 상태는 한 번만 조회하고, 아티팩트마다 컴포넌트를 찾습니다.
    pub async fn reconcile_inspection(
        &self,
        identity: &ProjectIdentity,
        artifacts: &mut [(Artifact, ExternalId)],
    ) -> ReconcileTally {
        let mut tally = ReconcileTally::default();

        let project = match self.project(identity).await {
            Ok(view) => match self.client.get_policy_status(&view).await {
                Ok(overall) => Ok((view, overall)),
                Err(e) => Err(ScannerError::from(e)),
            },
            Err(e) => Err(e),
        };

        let (view, overall) = match project {
            Ok(found) => found,
            Err(e) => {
                let message = e.to_string();
                warn!(project = %identity.project_name, error = %message, "inspection project unavailable");
                for (artifact, _) in artifacts.iter_mut() {
                    self.fail(artifact, &message, &mut tally).await;
                }
                return tally;
            }
        };

        for (artifact, external_id) in artifacts.iter_mut() {
            let result = self.component_risk(&view, &overall, external_id).await;
            self.settle(artifact, result, &mut tally).await;
        }
        info!(
            project = %identity.project_name,
            succeeded = tally.succeeded,
            failed = tally.failed,
            component_not_found = tally.component_not_found,
            "inspection reconciled"
        );
        tally
    }

    async fn project(&self, identity: &ProjectIdentity) -> Result<ProjectVersionView, ScannerError> {
        self.client
            .get_project_version(&identity.project_name, &identity.project_version)
            .await?
            .ok_or_else(|| {
                ScannerError::Client(ClientError::NotFound(format!(
                    "project version '{}' / '{}' not found on the analysis server",
                    identity.project_name, identity.project_version
                )))
            })
    }

    async fn scan_risk(&self, identity: &ProjectIdentity) -> Result<RiskSummary, ScannerError> {
        let view = self.project(identity).await?;
        let vulnerabilities = self.client.get_vulnerabilities(&view).await?;
        let policy = self.client.get_policy_status(&view).await?;
        Ok(aggregate(&vulnerabilities, self.mode).into_risk(
            policy.clone(),
            policy,
            Some(view.url),
            Some(view.id),
        ))
    }

    async fn component_risk(
        &self,
        view: &ProjectVersionView,
        overall: &str,
        external_id: &ExternalId,
    ) -> Result<Settled, ScannerError> {
        let Some(component) = self.client.find_component(view, external_id).await? else {
            return Ok(Settled::ComponentNotFound(format!(
                "Component {external_id} was not found in the inspection results"
            )));
        };
        let risk = aggregate(&component.vulnerabilities, self.mode).into_risk(
            overall.to_owned(),
            component.policy_status,
            component.url.or_else(|| Some(view.url.clone())),
            component.origin_id,
        );
        Ok(Settled::Success(risk))
    }

    async fn settle(
        &self,
        artifact: &mut Artifact,
        result: Result<Settled, ScannerError>,
        tally: &mut ReconcileTally,
    ) {
        let written = match result {
            Ok(Settled::Success(risk)) => {
                let written = self.ledger.mark_success(artifact, &risk, RESULTS_RECORDED).await;
                if written.is_ok() {
                    tally.succeeded += 1;
                }
                written
            }
            Ok(Settled::ComponentNotFound(description)) => {
                let written = self
                    .ledger
                    .mark_component_not_found(artifact, &description)
                    .await;
                if written.is_ok() {
                    tally.component_not_found += 1;
                }
                written
            }
            Err(e) => {
                self.fail(artifact, &e.to_string(), tally).await;
                return;
            }
        };

        if let Err(e) = written {
            // 결과 기록 실패는 FAILURE로 한 번 더 시도
            self.fail(artifact, &e.to_string(), tally).await;
        }
    }

    async fn fail(&self, artifact: &mut Artifact, description: &str, tally: &mut ReconcileTally) {
        warn!(
            repository = %artifact.repository,
            artifact = %artifact.name,
            error = description,
            "reconciliation failed"
        );
        if let Err(e) = self.ledger.mark_failure(artifact, description).await {
            warn!(artifact = %artifact.name, error = %e, "could not record failure");
        }
        tally.failed += 1;
    }
}
