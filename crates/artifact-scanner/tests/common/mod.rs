//! Shared fixtures for scanner integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use vaultscan_artifact_scanner::client::{
    ComponentView, ProjectVersionView, RejectedTarget, ScanSubmission, SubmissionHandle,
    Vulnerability,
};
use vaultscan_artifact_scanner::prepare::{ExternalId, GraphDocument, ScanTarget};
use vaultscan_artifact_scanner::{
    AnalysisClient, Artifact, ClientConnector, ClientError, InMemoryBlobStore, InMemoryCatalog,
    ServerConnection,
};
use vaultscan_core::config::ServerConfig;
use vaultscan_core::types::Severity;

/// In-process stand-in for the analysis service.
///
/// Every accepted submission registers a project version, so reconciliation
/// finds what was uploaded unless a test says otherwise.
#[derive(Default)]
pub struct FakeAnalysisServer {
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    /// names the server will confirm (`None` = everything)
    confirm: Option<HashSet<String>>,
    reject: HashSet<String>,
    failing_projects: HashSet<String>,
    missing_components: HashSet<String>,
    vulnerabilities: HashMap<String, Vec<Severity>>,
    projects: HashMap<(String, String), ProjectVersionView>,
    graph_components: HashMap<String, Vec<ExternalId>>,
    submitted_targets: Vec<String>,
    graphs: usize,
}

impl FakeAnalysisServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn confirm_only(self, names: &[&str]) -> Self {
        self.state.lock().unwrap().confirm = Some(names.iter().map(|n| (*n).to_owned()).collect());
        self
    }

    pub fn reject(self, name: &str) -> Self {
        self.state.lock().unwrap().reject.insert(name.to_owned());
        self
    }

    pub fn fail_project(self, project: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_projects
            .insert(project.to_owned());
        self
    }

    pub fn without_component(self, id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .missing_components
            .insert(id.to_owned());
        self
    }

    pub fn vulnerabilities(self, project: &str, severities: &[Severity]) -> Self {
        self.state
            .lock()
            .unwrap()
            .vulnerabilities
            .insert(project.to_owned(), severities.to_vec());
        self
    }

    pub fn submitted_targets(&self) -> Vec<String> {
        self.state.lock().unwrap().submitted_targets.clone()
    }

    pub fn graph_count(&self) -> usize {
        self.state.lock().unwrap().graphs
    }

    fn register(state: &mut FakeState, project: &str, version: &str) {
        let n = state.projects.len() + 1;
        state
            .projects
            .entry((project.to_owned(), version.to_owned()))
            .or_insert_with(|| ProjectVersionView {
                id: format!("pv-{n}"),
                project_name: project.to_owned(),
                version_name: version.to_owned(),
                url: format!("https://analysis.test/versions/pv-{n}"),
            });
    }

    fn vulns(state: &FakeState, project: &str) -> Vec<Vulnerability> {
        state
            .vulnerabilities
            .get(project)
            .map(|list| {
                list.iter()
                    .enumerate()
                    .map(|(i, s)| Vulnerability {
                        id: format!("CVE-2023-{i:05}"),
                        severity: *s,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Client handle shared between the connector and the test body
pub struct FakeClient(pub Arc<FakeAnalysisServer>);

impl AnalysisClient for FakeClient {
    async fn submit_graph(&self, document: &GraphDocument) -> Result<SubmissionHandle, ClientError> {
        let mut state = self.0.state.lock().unwrap();
        state.graphs += 1;
        FakeAnalysisServer::register(&mut state, &document.project_name, &document.project_version);
        let ids = document.components.iter().map(|n| n.external_id.clone()).collect();
        state.graph_components.insert(document.project_name.clone(), ids);
        Ok(SubmissionHandle {
            token: format!("graph-{}", state.graphs),
            accepted: vec![document.unit_name()],
        })
    }

    async fn submit_scan_targets(
        &self,
        targets: &[ScanTarget],
    ) -> Result<ScanSubmission, ClientError> {
        let mut state = self.0.state.lock().unwrap();
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for target in targets {
            assert!(target.path.exists(), "scan target must be materialized");
            state.submitted_targets.push(target.name.clone());
            if state.reject.contains(&target.name) {
                rejected.push(RejectedTarget {
                    name: target.name.clone(),
                    error: ClientError::QuotaExceeded("scan limit reached".to_owned()),
                });
            } else {
                FakeAnalysisServer::register(
                    &mut state,
                    &target.identity.project_name,
                    &target.identity.project_version,
                );
                accepted.push(target.name.clone());
            }
        }
        Ok(ScanSubmission {
            handle: SubmissionHandle {
                token: uuid_like(state.submitted_targets.len()),
                accepted,
            },
            rejected,
        })
    }

    async fn poll_notifications(
        &self,
        _handle: &SubmissionHandle,
        names: &[String],
        _expected: usize,
        _timeout: Duration,
    ) -> Result<Vec<String>, ClientError> {
        let state = self.0.state.lock().unwrap();
        Ok(names
            .iter()
            .filter(|n| state.confirm.as_ref().is_none_or(|c| c.contains(*n)))
            .cloned()
            .collect())
    }

    async fn get_project_version(
        &self,
        project_name: &str,
        version_name: &str,
    ) -> Result<Option<ProjectVersionView>, ClientError> {
        let state = self.0.state.lock().unwrap();
        Ok(state
            .projects
            .get(&(project_name.to_owned(), version_name.to_owned()))
            .cloned())
    }

    async fn get_vulnerabilities(
        &self,
        view: &ProjectVersionView,
    ) -> Result<Vec<Vulnerability>, ClientError> {
        let state = self.0.state.lock().unwrap();
        if state.failing_projects.contains(&view.project_name) {
            return Err(ClientError::Transient("upstream timeout".to_owned()));
        }
        Ok(FakeAnalysisServer::vulns(&state, &view.project_name))
    }

    async fn get_policy_status(&self, view: &ProjectVersionView) -> Result<String, ClientError> {
        let state = self.0.state.lock().unwrap();
        let violated = state
            .vulnerabilities
            .get(&view.project_name)
            .is_some_and(|v| v.contains(&Severity::Critical));
        Ok(if violated { "IN_VIOLATION" } else { "NOT_IN_VIOLATION" }.to_owned())
    }

    async fn find_component(
        &self,
        view: &ProjectVersionView,
        external_id: &ExternalId,
    ) -> Result<Option<ComponentView>, ClientError> {
        let state = self.0.state.lock().unwrap();
        if state.missing_components.contains(&external_id.id) {
            return Ok(None);
        }
        let known = state
            .graph_components
            .get(&view.project_name)
            .is_some_and(|ids| ids.contains(external_id));
        Ok(known.then(|| ComponentView {
            external_id: external_id.clone(),
            origin_id: Some(format!("origin-{}", external_id.id)),
            url: Some(format!("{}/components/{}", view.url, external_id.id)),
            policy_status: "NOT_IN_VIOLATION".to_owned(),
            vulnerabilities: FakeAnalysisServer::vulns(&state, &external_id.id),
        }))
    }
}

fn uuid_like(n: usize) -> String {
    format!("00000000-0000-4000-8000-{n:012}")
}

/// Connector handing out the shared fake server
pub struct FakeConnector {
    pub server: Arc<FakeAnalysisServer>,
}

impl ClientConnector for FakeConnector {
    type Client = FakeClient;

    async fn connect(&self, _server: &ServerConfig) -> Result<FakeClient, ClientError> {
        Ok(FakeClient(Arc::clone(&self.server)))
    }
}

pub fn server_config() -> ServerConfig {
    ServerConfig {
        url: "https://analysis.test".to_owned(),
        api_token: "test-token".to_owned(),
        timeout_secs: 12,
        ..ServerConfig::default()
    }
}

pub fn connection(server: &Arc<FakeAnalysisServer>) -> Arc<ServerConnection<FakeConnector>> {
    Arc::new(ServerConnection::new(
        FakeConnector {
            server: Arc::clone(server),
        },
        server_config(),
    ))
}

pub fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
}

/// Seeds a catalog and blob store with `(name, modified)` artifacts.
pub async fn seed(
    repository: &str,
    artifacts: &[(&str, DateTime<Utc>)],
) -> (Arc<InMemoryCatalog>, Arc<InMemoryBlobStore>) {
    let catalog = Arc::new(InMemoryCatalog::new());
    let blobs = Arc::new(InMemoryBlobStore::new());
    for (name, modified) in artifacts {
        catalog
            .insert(Artifact::new(repository, *name, *modified))
            .await;
        blobs.put(*name, format!("binary content of {name}")).await;
    }
    (catalog, blobs)
}
