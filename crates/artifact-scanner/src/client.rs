//! 분석 서버 클라이언트 경계
//!
//! 외부 분석 서비스의 REST/SDK 구현은 범위 밖이며, 오케스트레이터는
//! [`AnalysisClient`] trait만 호출합니다. 테스트에서는 mock 구현을 사용합니다.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use vaultscan_core::types::Severity;

use crate::error::ClientError;
use crate::prepare::{ExternalId, GraphDocument, ScanTarget};

/// 제출 handle
///
/// 한 페이지(스캔) 또는 한 순회(인스펙션) 동안만 유효합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionHandle {
    /// 서버 상관관계 토큰
    pub token: String,
    /// 서버가 수락한 단위 이름
    pub accepted: Vec<String>,
}

impl SubmissionHandle {
    pub fn is_accepted(&self, name: &str) -> bool {
        self.accepted.iter().any(|n| n == name)
    }
}

/// 서버가 거부한 스캔 대상
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedTarget {
    pub name: String,
    pub error: ClientError,
}

/// 스캔 대상 제출 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSubmission {
    pub handle: SubmissionHandle,
    pub rejected: Vec<RejectedTarget>,
}

/// 분석 서버 프로젝트 버전 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectVersionView {
    /// 서버 측 식별자
    pub id: String,
    pub project_name: String,
    pub version_name: String,
    /// 결과 화면 URL
    pub url: String,
}

/// 취약점 한 건
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vulnerability {
    pub id: String,
    pub severity: Severity,
}

/// 프로젝트 버전 안의 컴포넌트 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentView {
    pub external_id: ExternalId,
    /// 서버 측 원본 식별자
    pub origin_id: Option<String>,
    /// 컴포넌트 결과 URL
    pub url: Option<String>,
    /// 컴포넌트 정책 상태
    pub policy_status: String,
    pub vulnerabilities: Vec<Vulnerability>,
}

/// Analysis service client.
///
/// All calls are issued sequentially by a single repository run. Errors carry
/// the upstream message, which the orchestrator records verbatim in the ledger.
pub trait AnalysisClient: Send + Sync + 'static {
    /// Uploads a dependency graph document for inspection.
    fn submit_graph(
        &self,
        document: &GraphDocument,
    ) -> impl Future<Output = Result<SubmissionHandle, ClientError>> + Send;

    /// Hands materialized files to the binary scanner for upload.
    ///
    /// Individual targets may be rejected while the rest are accepted.
    fn submit_scan_targets(
        &self,
        targets: &[ScanTarget],
    ) -> impl Future<Output = Result<ScanSubmission, ClientError>> + Send;

    /// Returns the names (subset of `names`) the server has durably processed.
    ///
    /// `timeout` bounds a single request, not the overall wait.
    fn poll_notifications(
        &self,
        handle: &SubmissionHandle,
        names: &[String],
        expected: usize,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<String>, ClientError>> + Send;

    /// Looks up a project version, `None` when it does not exist.
    fn get_project_version(
        &self,
        project_name: &str,
        version_name: &str,
    ) -> impl Future<Output = Result<Option<ProjectVersionView>, ClientError>> + Send;

    /// Lists the vulnerabilities of a project version.
    fn get_vulnerabilities(
        &self,
        view: &ProjectVersionView,
    ) -> impl Future<Output = Result<Vec<Vulnerability>, ClientError>> + Send;

    /// Returns the overall policy status of a project version.
    fn get_policy_status(
        &self,
        view: &ProjectVersionView,
    ) -> impl Future<Output = Result<String, ClientError>> + Send;

    /// Finds a component of a project version by external id.
    fn find_component(
        &self,
        view: &ProjectVersionView,
        external_id: &ExternalId,
    ) -> impl Future<Output = Result<Option<ComponentView>, ClientError>> + Send;
}

/// 테스트용 Mock 분석 클라이언트
///
/// 제출은 모두 수락하고, `confirm`에 넣은 이름만 폴링 결과로 돌려줍니다.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockAnalysisClient {
    /// 폴링 시 확인된 것으로 보고할 이름 (None이면 전부)
    pub confirm: Option<Vec<String>>,
    /// 거부할 스캔 대상 이름
    pub reject: Vec<String>,
    /// 제출 자체를 실패시킬 에러
    pub submit_error: Option<ClientError>,
    /// 존재하는 프로젝트 버전
    pub projects: Vec<ProjectVersionView>,
    /// 프로젝트 이름별 취약점
    pub vulnerabilities: std::collections::HashMap<String, Vec<Vulnerability>>,
    /// 취약점 조회를 실패시킬 프로젝트 이름
    pub failing_projects: Vec<String>,
    /// 프로젝트 버전 안의 컴포넌트
    pub components: Vec<ComponentView>,
    /// 폴링 요청이 응답하지 않음
    pub hang_polls: bool,
    /// 폴링 호출 횟수
    pub polls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MockAnalysisClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 프로젝트 버전을 등록합니다.
    pub fn with_project(mut self, name: &str, version: &str) -> Self {
        self.projects.push(ProjectVersionView {
            id: format!("pv-{}", self.projects.len() + 1),
            project_name: name.to_owned(),
            version_name: version.to_owned(),
            url: format!("https://analysis.example.com/projects/{name}/{version}"),
        });
        self
    }

    /// 프로젝트 취약점을 등록합니다.
    pub fn with_vulnerabilities(mut self, project: &str, severities: &[Severity]) -> Self {
        let vulns = severities
            .iter()
            .enumerate()
            .map(|(i, s)| Vulnerability {
                id: format!("CVE-2024-{i:04}"),
                severity: *s,
            })
            .collect();
        self.vulnerabilities.insert(project.to_owned(), vulns);
        self
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
impl AnalysisClient for MockAnalysisClient {
    async fn submit_graph(&self, document: &GraphDocument) -> Result<SubmissionHandle, ClientError> {
        if let Some(e) = &self.submit_error {
            return Err(e.clone());
        }
        Ok(SubmissionHandle {
            token: "graph-1".to_owned(),
            accepted: vec![document.unit_name()],
        })
    }

    async fn submit_scan_targets(
        &self,
        targets: &[ScanTarget],
    ) -> Result<ScanSubmission, ClientError> {
        if let Some(e) = &self.submit_error {
            return Err(e.clone());
        }
        let (rejected, accepted): (Vec<_>, Vec<_>) = targets
            .iter()
            .partition(|t| self.reject.contains(&t.name));
        Ok(ScanSubmission {
            handle: SubmissionHandle {
                token: "scan-1".to_owned(),
                accepted: accepted.iter().map(|t| t.name.clone()).collect(),
            },
            rejected: rejected
                .iter()
                .map(|t| RejectedTarget {
                    name: t.name.clone(),
                    error: ClientError::QuotaExceeded("scan quota reached".to_owned()),
                })
                .collect(),
        })
    }

    async fn poll_notifications(
        &self,
        _handle: &SubmissionHandle,
        names: &[String],
        _expected: usize,
        _timeout: Duration,
    ) -> Result<Vec<String>, ClientError> {
        self.polls
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if self.hang_polls {
            std::future::pending::<()>().await;
        }
        Ok(names
            .iter()
            .filter(|n| self.confirm.as_ref().is_none_or(|c| c.contains(n)))
            .cloned()
            .collect())
    }

    async fn get_project_version(
        &self,
        project_name: &str,
        version_name: &str,
    ) -> Result<Option<ProjectVersionView>, ClientError> {
        Ok(self
            .projects
            .iter()
            .find(|p| p.project_name == project_name && p.version_name == version_name)
            .cloned())
    }

    async fn get_vulnerabilities(
        &self,
        view: &ProjectVersionView,
    ) -> Result<Vec<Vulnerability>, ClientError> {
        if self.failing_projects.contains(&view.project_name) {
            return Err(ClientError::Transient("vulnerability service down".to_owned()));
        }
        Ok(self
            .vulnerabilities
            .get(&view.project_name)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_policy_status(&self, _view: &ProjectVersionView) -> Result<String, ClientError> {
        Ok("NOT_IN_VIOLATION".to_owned())
    }

    async fn find_component(
        &self,
        _view: &ProjectVersionView,
        external_id: &ExternalId,
    ) -> Result<Option<ComponentView>, ClientError> {
        Ok(self
            .components
            .iter()
            .find(|c| c.external_id == *external_id)
            .cloned())
    }
}
