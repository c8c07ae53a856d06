//! 카탈로그 — 아티팩트 모델과 이름 순 페이지 조회
//!
//! [`CatalogStore`]는 외부 카탈로그 저장소의 경계입니다. 이 모듈은
//! 페이지 단위 순회([`CatalogCursor`])와 테스트/임베딩용
//! [`InMemoryCatalog`]를 제공합니다.
//!
//! # 순회 규칙
//! - 이름 오름차순, 다음 페이지의 하한은 이전 페이지의 마지막 이름 (배타적)
//! - 빈 페이지가 유일한 종료 신호
//! - 순회 도중 이름이 바뀌거나 이동한 아티팩트는 누락될 수 있음

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use vaultscan_core::config::MAX_PAGE_SIZE;

use crate::error::ScannerError;

/// 아티팩트 식별자
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactId(pub String);

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 블롭 참조 (블롭 저장소 내 키)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobRef(pub String);

/// 컴포넌트 좌표
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    /// group (Maven 계열에서만 사용)
    pub group: Option<String>,
    /// 이름
    pub name: String,
    /// 버전
    pub version: String,
}

/// 아티팩트 상태 패널 (평면 key → string 맵)
///
/// 저장소 경계에서만 사용되며, 내부 로직은 [`LedgerEntry`](crate::ledger::LedgerEntry)로 다룹니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusPanel(BTreeMap<String, String>);

impl StatusPanel {
    /// 빈 패널을 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for StatusPanel {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// 카탈로그 아티팩트
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// 식별자
    pub id: ArtifactId,
    /// 소유 저장소 키
    pub repository: String,
    /// 전체 경로 (정렬 키)
    pub name: String,
    /// 수정 시각
    pub modified: DateTime<Utc>,
    /// 블롭 참조
    pub blob: Option<BlobRef>,
    /// 컴포넌트 좌표
    pub component: Option<Component>,
    /// 상태 패널
    #[serde(default)]
    pub panel: StatusPanel,
}

impl Artifact {
    /// 블롭이 있는 아티팩트를 생성합니다. id와 블롭 키는 이름을 그대로 사용합니다.
    pub fn new(
        repository: impl Into<String>,
        name: impl Into<String>,
        modified: DateTime<Utc>,
    ) -> Self {
        let name = name.into();
        Self {
            id: ArtifactId(name.clone()),
            repository: repository.into(),
            blob: Some(BlobRef(name.clone())),
            name,
            modified,
            component: None,
            panel: StatusPanel::new(),
        }
    }

    /// 컴포넌트 좌표를 설정합니다.
    pub fn with_component(mut self, component: Component) -> Self {
        self.component = Some(component);
        self
    }

    /// 블롭 참조를 제거합니다.
    pub fn without_blob(mut self) -> Self {
        self.blob = None;
        self
    }

    /// 경로의 마지막 요소(파일 이름)를 반환합니다.
    pub fn file_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

/// 페이지 조회 조건
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    /// 이 이름보다 큰 아티팩트만 (배타적 하한)
    pub name_after: Option<String>,
    /// 최대 개수
    pub limit: usize,
}

/// 조회된 페이지
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// 이름 오름차순 아티팩트
    pub items: Vec<Artifact>,
    /// 페이지의 마지막(최대) 이름
    pub last_name: Option<String>,
}

impl Page {
    fn from_items(items: Vec<Artifact>) -> Self {
        let last_name = items.last().map(|a| a.name.clone());
        Self { items, last_name }
    }

    /// 항목이 있는지 반환합니다.
    pub fn has_items(&self) -> bool {
        !self.items.is_empty()
    }
}

/// 카탈로그 저장소 경계
///
/// 구현체는 `find_page`에서 `name > name_after` 조건과 이름 오름차순 정렬을 적용해야 합니다.
/// `write_panel`은 즉시 영속화되어야 하며, 빈 패널은 패널 전체 제거를 뜻합니다.
pub trait CatalogStore: Send + Sync {
    /// 이름 순으로 한 페이지를 조회합니다.
    fn find_page(
        &self,
        repository: &str,
        query: &PageQuery,
    ) -> impl Future<Output = Result<Vec<Artifact>, ScannerError>> + Send;

    /// 아티팩트 상태 패널을 기록합니다.
    fn write_panel(
        &self,
        repository: &str,
        id: &ArtifactId,
        panel: &StatusPanel,
    ) -> impl Future<Output = Result<(), ScannerError>> + Send;
}

/// 한 페이지를 조회합니다.
///
/// `page_size`는 1-100 범위로 보정됩니다. 반환된 항목 중 하한 이하이거나
/// 순서가 어긋난 항목은 버려서 순회 단조성을 보장합니다.
pub async fn fetch_page<C: CatalogStore>(
    catalog: &C,
    repository: &str,
    last_name: Option<&str>,
    page_size: usize,
) -> Result<Page, ScannerError> {
    let query = PageQuery {
        name_after: last_name.map(str::to_owned),
        limit: page_size.clamp(1, MAX_PAGE_SIZE),
    };

    let raw = catalog.find_page(repository, &query).await?;

    let mut items = Vec::with_capacity(raw.len());
    let mut bound = query.name_after.clone();
    for artifact in raw.into_iter().take(query.limit) {
        if bound.as_deref().is_some_and(|b| artifact.name.as_str() <= b) {
            warn!(
                repository,
                artifact = %artifact.name,
                "catalog returned out-of-order artifact, dropping"
            );
            continue;
        }
        bound = Some(artifact.name.clone());
        items.push(artifact);
    }

    debug!(repository, count = items.len(), after = ?query.name_after, "fetched catalog page");
    Ok(Page::from_items(items))
}

/// 재개 가능한 페이지 커서
///
/// 빈 페이지를 만나면 소진 상태가 되어 이후 `next_page`는 `None`을 반환합니다.
pub struct CatalogCursor<'a, C> {
    catalog: &'a C,
    repository: String,
    page_size: usize,
    last_name: Option<String>,
    exhausted: bool,
}

impl<'a, C: CatalogStore> CatalogCursor<'a, C> {
    /// 저장소 처음부터 순회하는 커서를 생성합니다.
    pub fn new(catalog: &'a C, repository: impl Into<String>, page_size: usize) -> Self {
        Self {
            catalog,
            repository: repository.into(),
            page_size,
            last_name: None,
            exhausted: false,
        }
    }

    /// 주어진 이름 다음부터 순회를 재개합니다.
    pub fn resume_after(mut self, last_name: impl Into<String>) -> Self {
        self.last_name = Some(last_name.into());
        self
    }

    /// 마지막으로 반환한 이름
    pub fn position(&self) -> Option<&str> {
        self.last_name.as_deref()
    }

    /// 다음 페이지를 조회합니다. 소진되면 `None`을 반환합니다.
    pub async fn next_page(&mut self) -> Result<Option<Page>, ScannerError> {
        if self.exhausted {
            return Ok(None);
        }

        let page = fetch_page(
            self.catalog,
            &self.repository,
            self.last_name.as_deref(),
            self.page_size,
        )
        .await?;

        match &page.last_name {
            Some(last) => {
                self.last_name = Some(last.clone());
                Ok(Some(page))
            }
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }
}

// ─── InMemoryCatalog ─────────────────────────────────────────────────

/// 메모리 기반 카탈로그
///
/// 테스트와 임베딩용 참조 구현입니다.
#[derive(Default)]
pub struct InMemoryCatalog {
    repositories: RwLock<BTreeMap<String, BTreeMap<String, Artifact>>>,
    unavailable: AtomicBool,
    queries: AtomicUsize,
    writes: AtomicUsize,
}

impl InMemoryCatalog {
    /// 빈 카탈로그를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 아티팩트를 추가하거나 교체합니다.
    pub async fn insert(&self, artifact: Artifact) {
        let mut repos = self.repositories.write().await;
        repos
            .entry(artifact.repository.clone())
            .or_default()
            .insert(artifact.name.clone(), artifact);
    }

    /// 아티팩트를 제거합니다.
    pub async fn remove(&self, repository: &str, name: &str) -> Option<Artifact> {
        let mut repos = self.repositories.write().await;
        repos.get_mut(repository).and_then(|r| r.remove(name))
    }

    /// 이름으로 아티팩트를 조회합니다.
    pub async fn artifact(&self, repository: &str, name: &str) -> Option<Artifact> {
        let repos = self.repositories.read().await;
        repos.get(repository).and_then(|r| r.get(name)).cloned()
    }

    /// 저장소의 모든 아티팩트를 이름 순으로 반환합니다.
    pub async fn artifacts(&self, repository: &str) -> Vec<Artifact> {
        let repos = self.repositories.read().await;
        repos
            .get(repository)
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default()
    }

    /// 이후 조회를 실패시킵니다 (장애 시뮬레이션).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// 지금까지의 페이지 조회 횟수
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }

    /// 지금까지의 패널 기록 횟수
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

impl CatalogStore for InMemoryCatalog {
    async fn find_page(
        &self,
        repository: &str,
        query: &PageQuery,
    ) -> Result<Vec<Artifact>, ScannerError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ScannerError::Catalog {
                repository: repository.to_owned(),
                reason: "catalog unavailable".to_owned(),
            });
        }

        let repos = self.repositories.read().await;
        let Some(repo) = repos.get(repository) else {
            return Ok(Vec::new());
        };

        let items = match &query.name_after {
            Some(after) => repo
                .range::<str, _>((
                    std::ops::Bound::Excluded(after.as_str()),
                    std::ops::Bound::Unbounded,
                ))
                .take(query.limit)
                .map(|(_, a)| a.clone())
                .collect(),
            None => repo.values().take(query.limit).cloned().collect(),
        };
        Ok(items)
    }

    async fn write_panel(
        &self,
        repository: &str,
        id: &ArtifactId,
        panel: &StatusPanel,
    ) -> Result<(), ScannerError> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let mut repos = self.repositories.write().await;
        let artifact = repos
            .get_mut(repository)
            .and_then(|r| r.values_mut().find(|a| a.id == *id))
            .ok_or_else(|| ScannerError::Ledger {
                artifact: id.to_string(),
                reason: "artifact no longer exists".to_owned(),
            })?;
        artifact.panel = panel.clone();
        Ok(())
    }
}
