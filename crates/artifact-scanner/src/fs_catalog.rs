//! 디렉토리 기반 카탈로그와 블롭 저장소
//!
//! 루트 아래 하위 디렉토리 하나가 저장소 하나입니다. 저장소 안의 일반 파일이
//! 아티팩트가 되며, 이름은 저장소 기준 상대 경로(`/` 구분)입니다.
//!
//! ```text
//! <root>/
//!   releases/com/acme/app-1.0.war
//!   .vaultscan/releases.json      # 상태 패널과 컴포넌트 좌표
//! ```
//!
//! 상태 파일은 임시 파일에 쓴 뒤 rename으로 교체하므로 중간 상태가 남지 않습니다.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use walkdir::WalkDir;

use crate::blob::{BlobHandle, BlobStore};
use crate::catalog::{Artifact, ArtifactId, BlobRef, CatalogStore, Component, PageQuery, StatusPanel};
use crate::error::ScannerError;

/// 상태 디렉토리 이름
pub const STATE_DIR: &str = ".vaultscan";

/// 저장소별 상태 파일 내용
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryState {
    /// 아티팩트 이름별 상태 패널
    #[serde(default)]
    pub panels: BTreeMap<String, StatusPanel>,
    /// 아티팩트 이름별 컴포넌트 좌표
    #[serde(default)]
    pub components: BTreeMap<String, Component>,
}

/// 디렉토리 기반 카탈로그
pub struct FsCatalog {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FsCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 루트 아래의 저장소 키 목록 (이름 순)
    pub async fn repositories(&self) -> Result<Vec<String>, ScannerError> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| self.catalog_err("*", e))?;
        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| self.catalog_err("*", e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == STATE_DIR || name.starts_with('.') {
                continue;
            }
            if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                keys.push(name);
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// 아티팩트의 컴포넌트 좌표를 기록합니다.
    pub async fn set_component(
        &self,
        repository: &str,
        name: &str,
        component: Component,
    ) -> Result<(), ScannerError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.load_state(repository).await?;
        state.components.insert(name.to_owned(), component);
        self.save_state(repository, &state).await
    }

    fn state_path(&self, repository: &str) -> PathBuf {
        self.root.join(STATE_DIR).join(format!("{repository}.json"))
    }

    fn catalog_err(&self, repository: &str, e: impl std::fmt::Display) -> ScannerError {
        ScannerError::Catalog {
            repository: repository.to_owned(),
            reason: e.to_string(),
        }
    }

    /// 상태 파일을 읽습니다. 없으면 빈 상태입니다.
    pub async fn load_state(&self, repository: &str) -> Result<RepositoryState, ScannerError> {
        let path = self.state_path(repository);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                self.catalog_err(repository, format!("{}: {e}", path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RepositoryState::default()),
            Err(e) => Err(ScannerError::Io {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }

    async fn save_state(
        &self,
        repository: &str,
        state: &RepositoryState,
    ) -> Result<(), ScannerError> {
        let path = self.state_path(repository);
        let json = serde_json::to_vec_pretty(state).map_err(|e| ScannerError::Ledger {
            artifact: repository.to_owned(),
            reason: e.to_string(),
        })?;

        tokio::task::spawn_blocking(move || write_atomic(&path, &json))
            .await
            .map_err(|e| ScannerError::Ledger {
                artifact: repository.to_owned(),
                reason: e.to_string(),
            })?
    }

    /// 저장소 디렉토리의 모든 파일을 (이름, 수정 시각)으로 나열합니다.
    async fn list_files(&self, repository: &str) -> Result<Vec<(String, DateTime<Utc>)>, ScannerError> {
        let dir = self.root.join(repository);
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let repo = repository.to_owned();
        tokio::task::spawn_blocking(move || walk(&dir, &repo))
            .await
            .map_err(|e| self.catalog_err(repository, e))?
    }
}

fn walk(dir: &Path, repository: &str) -> Result<Vec<(String, DateTime<Utc>)>, ScannerError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| ScannerError::Catalog {
            repository: repository.to_owned(),
            reason: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let modified = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(Utc::now);
        files.push((name, modified));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<(), ScannerError> {
    let io_err = |source: std::io::Error| ScannerError::Io {
        path: path.display().to_string(),
        source,
    };
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(io_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(content).map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

impl CatalogStore for FsCatalog {
    async fn find_page(
        &self,
        repository: &str,
        query: &PageQuery,
    ) -> Result<Vec<Artifact>, ScannerError> {
        let files = self.list_files(repository).await?;
        let state = self.load_state(repository).await.map_err(|e| match e {
            ScannerError::Catalog { .. } => e,
            other => self.catalog_err(repository, other),
        })?;

        let items: Vec<Artifact> = files
            .into_iter()
            .filter(|(name, _)| query.name_after.as_deref().is_none_or(|after| name.as_str() > after))
            .take(query.limit)
            .map(|(name, modified)| {
                let mut artifact = Artifact::new(repository, name.clone(), modified);
                artifact.blob = Some(BlobRef(format!("{repository}/{name}")));
                artifact.component = state.components.get(&name).cloned();
                artifact.panel = state.panels.get(&name).cloned().unwrap_or_default();
                artifact
            })
            .collect();
        debug!(repository, count = items.len(), "listed file-system catalog page");
        Ok(items)
    }

    async fn write_panel(
        &self,
        repository: &str,
        id: &ArtifactId,
        panel: &StatusPanel,
    ) -> Result<(), ScannerError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.load_state(repository).await.map_err(|e| ScannerError::Ledger {
            artifact: id.to_string(),
            reason: e.to_string(),
        })?;
        if panel.is_empty() {
            state.panels.remove(&id.0);
        } else {
            state.panels.insert(id.0.clone(), panel.clone());
        }
        self.save_state(repository, &state).await
    }
}

impl BlobStore for FsCatalog {
    async fn open_blob(&self, blob: &BlobRef) -> Result<BlobHandle, ScannerError> {
        let blob_err = |reason: String| ScannerError::Blob {
            artifact: blob.0.clone(),
            reason,
        };
        if blob.0.split('/').any(|part| part == ".." || part.is_empty()) {
            return Err(blob_err("invalid blob reference".to_owned()));
        }

        let path = self.root.join(&blob.0);
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| blob_err(e.to_string()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(BlobHandle {
            name,
            reader: Box::new(file),
        })
    }
}
