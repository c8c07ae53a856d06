//! 제출 준비 — 인스펙션용 의존성 그래프와 스캔용 임시 파일
//!
//! - **인스펙션**: 컴포넌트 좌표로 외부 식별자를 만들어 저장소 단위 그래프에 추가
//! - **스캔**: 블롭 내용을 페이지별 작업 디렉토리에 파일로 저장
//!
//! 페이지 작업 디렉토리는 [`PageWorkDir`]가 drop될 때 결과와 무관하게 제거됩니다.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use vaultscan_core::types::{PackageType, Repository};

use crate::blob::BlobStore;
use crate::catalog::{Artifact, Component};
use crate::error::ScannerError;
use crate::ledger::ProjectIdentity;

/// 외부 의존성 식별자
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExternalId {
    /// forge 이름 (maven, npmjs, ...)
    pub forge: String,
    /// forge 내 식별자
    pub id: String,
}

impl ExternalId {
    /// 컴포넌트 좌표에서 식별자를 만듭니다.
    ///
    /// Maven 계열은 `group:name:version`, 나머지는 `name/version` 형식입니다.
    /// Maven 계열인데 group이 없으면 `None`.
    pub fn from_component(package_type: PackageType, component: &Component) -> Option<Self> {
        if component.name.is_empty() || component.version.is_empty() {
            return None;
        }
        let id = if package_type.uses_group() {
            let group = component.group.as_deref().filter(|g| !g.is_empty())?;
            format!("{group}:{}:{}", component.name, component.version)
        } else {
            format!("{}/{}", component.name, component.version)
        };
        Some(Self {
            forge: package_type.forge().to_owned(),
            id,
        })
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.forge, self.id)
    }
}

/// 그래프 노드 (외부 식별자와 원본 아티팩트)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub external_id: ExternalId,
    pub artifact: String,
}

/// 저장소 단위 의존성 그래프 (평면, 루트 직속 의존성만)
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<GraphNode>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// 노드를 추가합니다. 같은 식별자는 한 번만 들어갑니다.
    pub fn add(&mut self, external_id: ExternalId, artifact: &str) -> bool {
        if self.nodes.iter().any(|n| n.external_id == external_id) {
            return false;
        }
        self.nodes.push(GraphNode {
            external_id,
            artifact: artifact.to_owned(),
        });
        true
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    /// 제출용 문서로 변환합니다.
    pub fn into_document(self, identity: ProjectIdentity) -> GraphDocument {
        GraphDocument {
            project_name: identity.project_name,
            project_version: identity.project_version,
            components: self.nodes,
        }
    }
}

/// 분석 서버로 제출하는 그래프 문서
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub project_name: String,
    pub project_version: String,
    pub components: Vec<GraphNode>,
}

impl GraphDocument {
    /// 문서의 단위 이름 (제출 handle의 수락 목록에 쓰임)
    pub fn unit_name(&self) -> String {
        format!("{}/{}", self.project_name, self.project_version)
    }

    /// JSON으로 직렬화합니다.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// 인스펙션 프로젝트 식별 정보 (저장소 키 + 설정된 버전)
pub fn inspection_identity(repository: &Repository, project_version: &str) -> ProjectIdentity {
    ProjectIdentity {
        project_name: repository.key.clone(),
        project_version: project_version.to_owned(),
    }
}

/// 스캔 프로젝트 식별 정보
///
/// 프로젝트 이름은 `{저장소}/{전체 경로}`, 버전은 컴포넌트 버전(없으면 파일 이름)입니다.
pub fn scan_identity(artifact: &Artifact) -> ProjectIdentity {
    let project_version = artifact
        .component
        .as_ref()
        .map(|c| c.version.clone())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| artifact.file_name().to_owned());
    ProjectIdentity {
        project_name: format!("{}/{}", artifact.repository, artifact.name),
        project_version,
    }
}

// ─── 스캔 모드 ───────────────────────────────────────────────────────

/// 페이지별 임시 작업 디렉토리
///
/// drop 시 디렉토리와 내용이 제거됩니다.
#[derive(Debug)]
pub struct PageWorkDir {
    dir: tempfile::TempDir,
}

impl PageWorkDir {
    /// 작업 디렉토리 아래에 페이지 디렉토리를 만듭니다.
    ///
    /// 실패는 치명적 에러(`WorkDir`)입니다.
    pub async fn create(working_dir: &Path) -> Result<Self, ScannerError> {
        let to_err = |e: std::io::Error| ScannerError::WorkDir {
            path: working_dir.display().to_string(),
            reason: e.to_string(),
        };

        tokio::fs::create_dir_all(working_dir).await.map_err(to_err)?;
        let dir = tempfile::Builder::new()
            .prefix("page-")
            .tempdir_in(working_dir)
            .map_err(to_err)?;
        debug!(path = %dir.path().display(), "created page working directory");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// 스캔 대상 (임시 파일로 저장된 아티팩트)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTarget {
    /// 제출 단위 이름 (`{저장소}/{전체 경로}`)
    pub name: String,
    /// 저장된 파일 경로
    pub path: PathBuf,
    /// 원본 아티팩트 이름
    pub artifact: String,
    /// 프로젝트 식별 정보
    pub identity: ProjectIdentity,
    /// 외부 스캐너 메모리 한도 (MB)
    pub memory_mb: u32,
}

/// 블롭 내용을 페이지 작업 디렉토리에 저장합니다.
///
/// 같은 파일 이름이 한 페이지에 여럿 있을 수 있으므로 아티팩트마다
/// 순번 하위 디렉토리를 사용합니다. 실패는 아티팩트 단위 에러입니다.
pub async fn materialize<B: BlobStore>(
    blobs: &B,
    artifact: &Artifact,
    work_dir: &PageWorkDir,
    index: usize,
    memory_mb: u32,
) -> Result<ScanTarget, ScannerError> {
    let blob = artifact.blob.as_ref().ok_or_else(|| ScannerError::Blob {
        artifact: artifact.name.clone(),
        reason: "no blob reference".to_owned(),
    })?;

    let mut handle = blobs.open_blob(blob).await.map_err(|e| match e {
        ScannerError::Blob { .. } => e,
        other => ScannerError::Blob {
            artifact: artifact.name.clone(),
            reason: other.to_string(),
        },
    })?;

    let slot = work_dir.path().join(index.to_string());
    let io_err = |path: &Path, source: std::io::Error| ScannerError::Io {
        path: path.display().to_string(),
        source,
    };
    tokio::fs::create_dir_all(&slot)
        .await
        .map_err(|e| io_err(&slot, e))?;

    // 블롭 이름은 외부 값이므로 마지막 경로 요소만 사용
    let file_name = plain_file_name(&handle.name)
        .or_else(|| plain_file_name(artifact.file_name()))
        .unwrap_or("blob");
    let path = slot.join(file_name);
    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| io_err(&path, e))?;
    let bytes = tokio::io::copy(&mut handle.reader, &mut file)
        .await
        .map_err(|e| io_err(&path, e))?;

    debug!(artifact = %artifact.name, path = %path.display(), bytes, "materialized blob");

    Ok(ScanTarget {
        name: format!("{}/{}", artifact.repository, artifact.name),
        path,
        artifact: artifact.name.clone(),
        identity: scan_identity(artifact),
        memory_mb,
    })
}

fn plain_file_name(raw: &str) -> Option<&str> {
    Path::new(raw)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
}
