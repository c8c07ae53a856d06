//! 태스크 설정
//!
//! [`ScanTaskConfig`]와 [`InspectTaskConfig`]는 core의
//! [`VaultscanConfig`](vaultscan_core::config::VaultscanConfig)에서 파생되며,
//! 문자열 설정을 타입이 있는 값(cutoff 시각, 집계 방식 등)으로 변환합니다.
//!
//! # 사용 예시
//!
//! ```
//! use vaultscan_artifact_scanner::config::{CountingMode, ScanTaskConfigBuilder};
//!
//! let config = ScanTaskConfigBuilder::new()
//!     .enabled(true)
//!     .server_url("https://analysis.example.com")
//!     .name_patterns("*.war,*.zip")
//!     .counting_mode(CountingMode::Highest)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.selection.name_patterns, vec!["*.war", "*.zip"]);
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vaultscan_core::config::{
    MAX_PAGE_SIZE, SelectionConfig, ServerConfig, VaultscanConfig, parse_cutoff_date,
};
use vaultscan_core::types::Repository;

use crate::error::ScannerError;

/// 완료 대기 시간 = 요청 타임아웃 × 이 값
pub const COMPLETION_TIMEOUT_FACTOR: u64 = 5;

/// 기본 폴링 간격 (밀리초)
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// 취약점 집계 방식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountingMode {
    /// 심각도별 개수를 그대로 합산
    #[default]
    Sum,
    /// 존재하는 최고 심각도의 개수만 남기고 나머지는 0
    Highest,
}

impl CountingMode {
    /// 문자열에서 집계 방식을 파싱합니다 (대소문자 구분 없음).
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sum" => Some(Self::Sum),
            "highest" | "highest_only" => Some(Self::Highest),
            _ => None,
        }
    }
}

impl fmt::Display for CountingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sum => write!(f, "sum"),
            Self::Highest => write!(f, "highest"),
        }
    }
}

/// 아티팩트 선택 규칙 (타입 변환 완료)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionSettings {
    /// 파일 이름 glob 목록
    pub name_patterns: Vec<String>,
    /// 전체 경로 정규식 (빈 문자열이면 모두 허용)
    pub path_pattern: String,
    /// cutoff 시각
    pub cutoff: Option<DateTime<Utc>>,
    /// 페이지 크기
    pub page_size: usize,
    /// 항상 재처리
    pub always_process: bool,
    /// FAILURE 재처리
    pub redo_failures: bool,
    /// 재시도 대기 시간 (시간)
    pub retry_window_hours: u64,
    /// 집계 방식
    pub counting_mode: CountingMode,
}

impl Default for SelectionSettings {
    fn default() -> Self {
        Self {
            name_patterns: Vec::new(),
            path_pattern: String::new(),
            cutoff: None,
            page_size: MAX_PAGE_SIZE,
            always_process: false,
            redo_failures: false,
            retry_window_hours: 24,
            counting_mode: CountingMode::Sum,
        }
    }
}

impl SelectionSettings {
    /// core 선택 설정을 변환합니다.
    ///
    /// cutoff 날짜 형식이 잘못되었으면 에러를 반환합니다.
    pub fn from_core(section: &str, core: &SelectionConfig) -> Result<Self, ScannerError> {
        let cutoff = if core.cutoff_date.trim().is_empty() {
            None
        } else {
            Some(
                parse_cutoff_date(&core.cutoff_date).map_err(|reason| ScannerError::Config {
                    field: format!("{section}.cutoff_date"),
                    reason,
                })?,
            )
        };

        let counting_mode =
            CountingMode::from_str_loose(&core.counting_mode).ok_or_else(|| {
                ScannerError::Config {
                    field: format!("{section}.counting_mode"),
                    reason: format!("unknown counting mode '{}'", core.counting_mode),
                }
            })?;

        Ok(Self {
            name_patterns: core.name_pattern_list(),
            path_pattern: core.path_pattern.trim().to_owned(),
            cutoff,
            page_size: core.page_size,
            always_process: core.always_process,
            redo_failures: core.redo_failures,
            retry_window_hours: core.retry_window_hours,
            counting_mode,
        })
    }

    /// 재시도 대기 시간을 반환합니다.
    pub fn retry_window(&self) -> chrono::Duration {
        i64::try_from(self.retry_window_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .unwrap_or(chrono::Duration::MAX)
    }

    fn validate(&self, enabled: bool) -> Result<(), ScannerError> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(ScannerError::Config {
                field: "page_size".to_owned(),
                reason: format!("must be 1-{MAX_PAGE_SIZE}"),
            });
        }

        if enabled && self.name_patterns.is_empty() {
            return Err(ScannerError::Config {
                field: "name_patterns".to_owned(),
                reason: "at least one file name pattern is required".to_owned(),
            });
        }

        if !self.path_pattern.is_empty() {
            regex::Regex::new(&self.path_pattern).map_err(|e| ScannerError::Config {
                field: "path_pattern".to_owned(),
                reason: e.to_string(),
            })?;
        }

        for pattern in &self.name_patterns {
            globset::Glob::new(pattern).map_err(|e| ScannerError::Config {
                field: "name_patterns".to_owned(),
                reason: format!("invalid glob '{pattern}': {e}"),
            })?;
        }

        Ok(())
    }
}

fn validate_server(server: &ServerConfig) -> Result<(), ScannerError> {
    if server.url.trim().is_empty() {
        return Err(ScannerError::Config {
            field: "server.url".to_owned(),
            reason: "server url must not be empty".to_owned(),
        });
    }
    if server.timeout_secs == 0 {
        return Err(ScannerError::Config {
            field: "server.timeout_secs".to_owned(),
            reason: "must be greater than 0".to_owned(),
        });
    }
    Ok(())
}

fn covers(repositories: &[String], repository: &Repository) -> bool {
    repositories.is_empty() || repositories.iter().any(|k| *k == repository.key)
}

// ─── ScanTaskConfig ──────────────────────────────────────────────────

/// 바이너리 스캔 태스크 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanTaskConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 대상 저장소 (비어 있으면 전체)
    pub repositories: Vec<String>,
    /// 선택 규칙
    pub selection: SelectionSettings,
    /// 서버 연결 스냅샷
    pub server: ServerConfig,
    /// 작업 디렉토리
    pub working_dir: PathBuf,
    /// 외부 스캐너 메모리 한도 (MB)
    pub memory_mb: u32,

    // --- 모듈 고유 확장 ---
    /// 완료 폴링 초기 간격 (밀리초)
    pub poll_interval_ms: u64,
}

impl Default for ScanTaskConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            repositories: Vec::new(),
            selection: SelectionSettings::default(),
            server: ServerConfig::default(),
            working_dir: std::env::temp_dir().join("vaultscan"),
            memory_mb: 4096,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl ScanTaskConfig {
    /// core 설정에서 스캔 태스크 설정을 생성합니다.
    pub fn from_core(core: &VaultscanConfig) -> Result<Self, ScannerError> {
        Ok(Self {
            enabled: core.scan.enabled,
            repositories: core.scan.repositories.clone(),
            selection: SelectionSettings::from_core("scan", &core.scan.selection)?,
            server: core.server.clone(),
            working_dir: PathBuf::from(&core.scan.working_dir),
            memory_mb: core.scan.memory_mb,
            ..Self::default()
        })
    }

    /// 설정 값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ScannerError> {
        self.selection.validate(self.enabled)?;
        if self.enabled {
            validate_server(&self.server)?;
            if self.working_dir.as_os_str().is_empty() {
                return Err(ScannerError::Config {
                    field: "working_dir".to_owned(),
                    reason: "working directory must not be empty".to_owned(),
                });
            }
        }
        if self.poll_interval_ms == 0 {
            return Err(ScannerError::Config {
                field: "poll_interval_ms".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        Ok(())
    }

    /// 이 설정이 해당 저장소를 대상으로 하는지 반환합니다.
    pub fn covers(&self, repository: &Repository) -> bool {
        self.enabled && covers(&self.repositories, repository)
    }

    /// 완료 대기 제한 시간 (요청 타임아웃 × 5)
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.server.timeout_secs.saturating_mul(COMPLETION_TIMEOUT_FACTOR))
    }

    /// 폴링 초기 간격
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// [`ScanTaskConfig`] 빌더
#[derive(Default)]
pub struct ScanTaskConfigBuilder {
    config: ScanTaskConfig,
}

impl ScanTaskConfigBuilder {
    /// 기본값을 가진 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 활성화 여부를 설정합니다.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    /// 대상 저장소 목록을 설정합니다.
    pub fn repositories(mut self, keys: Vec<String>) -> Self {
        self.config.repositories = keys;
        self
    }

    /// 쉼표로 구분된 파일 이름 glob 목록을 설정합니다.
    pub fn name_patterns(mut self, csv: &str) -> Self {
        self.config.selection.name_patterns = split_patterns(csv);
        self
    }

    /// 경로 정규식을 설정합니다.
    pub fn path_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.selection.path_pattern = pattern.into();
        self
    }

    /// cutoff 시각을 설정합니다.
    pub fn cutoff(mut self, cutoff: DateTime<Utc>) -> Self {
        self.config.selection.cutoff = Some(cutoff);
        self
    }

    /// 페이지 크기를 설정합니다.
    pub fn page_size(mut self, size: usize) -> Self {
        self.config.selection.page_size = size;
        self
    }

    /// 항상 재처리 여부를 설정합니다.
    pub fn always_process(mut self, always: bool) -> Self {
        self.config.selection.always_process = always;
        self
    }

    /// FAILURE 재처리 여부를 설정합니다.
    pub fn redo_failures(mut self, redo: bool) -> Self {
        self.config.selection.redo_failures = redo;
        self
    }

    /// 재시도 대기 시간(시간)을 설정합니다.
    pub fn retry_window_hours(mut self, hours: u64) -> Self {
        self.config.selection.retry_window_hours = hours;
        self
    }

    /// 집계 방식을 설정합니다.
    pub fn counting_mode(mut self, mode: CountingMode) -> Self {
        self.config.selection.counting_mode = mode;
        self
    }

    /// 서버 URL을 설정합니다.
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.config.server.url = url.into();
        self
    }

    /// 서버 설정 전체를 교체합니다.
    pub fn server(mut self, server: ServerConfig) -> Self {
        self.config.server = server;
        self
    }

    /// 작업 디렉토리를 설정합니다.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.working_dir = dir.into();
        self
    }

    /// 외부 스캐너 메모리 한도를 설정합니다.
    pub fn memory_mb(mut self, mb: u32) -> Self {
        self.config.memory_mb = mb;
        self
    }

    /// 폴링 초기 간격(밀리초)을 설정합니다.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// 설정을 검증하고 빌드합니다.
    ///
    /// # Errors
    ///
    /// 유효성 검증 실패 시 `ScannerError::Config` 반환
    pub fn build(self) -> Result<ScanTaskConfig, ScannerError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ─── InspectTaskConfig ───────────────────────────────────────────────

/// 인스펙션 태스크 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectTaskConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 대상 저장소 (비어 있으면 전체)
    pub repositories: Vec<String>,
    /// 선택 규칙
    pub selection: SelectionSettings,
    /// 서버 연결 스냅샷
    pub server: ServerConfig,
    /// 저장소 프로젝트 버전 이름
    pub project_version: String,

    // --- 모듈 고유 확장 ---
    /// 완료 폴링 초기 간격 (밀리초)
    pub poll_interval_ms: u64,
}

impl Default for InspectTaskConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            repositories: Vec::new(),
            selection: SelectionSettings::default(),
            server: ServerConfig::default(),
            project_version: "inspection".to_owned(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl InspectTaskConfig {
    /// core 설정에서 인스펙션 태스크 설정을 생성합니다.
    pub fn from_core(core: &VaultscanConfig) -> Result<Self, ScannerError> {
        Ok(Self {
            enabled: core.inspect.enabled,
            repositories: core.inspect.repositories.clone(),
            selection: SelectionSettings::from_core("inspect", &core.inspect.selection)?,
            server: core.server.clone(),
            project_version: core.inspect.project_version.clone(),
            ..Self::default()
        })
    }

    /// 설정 값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ScannerError> {
        self.selection.validate(self.enabled)?;
        if self.enabled {
            validate_server(&self.server)?;
            if self.project_version.trim().is_empty() {
                return Err(ScannerError::Config {
                    field: "project_version".to_owned(),
                    reason: "project version must not be empty".to_owned(),
                });
            }
        }
        if self.poll_interval_ms == 0 {
            return Err(ScannerError::Config {
                field: "poll_interval_ms".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        Ok(())
    }

    /// 이 설정이 해당 저장소를 대상으로 하는지 반환합니다.
    pub fn covers(&self, repository: &Repository) -> bool {
        self.enabled && covers(&self.repositories, repository)
    }

    /// 완료 대기 제한 시간 (요청 타임아웃 × 5)
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.server.timeout_secs.saturating_mul(COMPLETION_TIMEOUT_FACTOR))
    }

    /// 폴링 초기 간격
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// [`InspectTaskConfig`] 빌더
#[derive(Default)]
pub struct InspectTaskConfigBuilder {
    config: InspectTaskConfig,
}

impl InspectTaskConfigBuilder {
    /// 기본값을 가진 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 활성화 여부를 설정합니다.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    /// 대상 저장소 목록을 설정합니다.
    pub fn repositories(mut self, keys: Vec<String>) -> Self {
        self.config.repositories = keys;
        self
    }

    /// 쉼표로 구분된 파일 이름 glob 목록을 설정합니다.
    pub fn name_patterns(mut self, csv: &str) -> Self {
        self.config.selection.name_patterns = split_patterns(csv);
        self
    }

    /// 경로 정규식을 설정합니다.
    pub fn path_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.selection.path_pattern = pattern.into();
        self
    }

    /// cutoff 시각을 설정합니다.
    pub fn cutoff(mut self, cutoff: DateTime<Utc>) -> Self {
        self.config.selection.cutoff = Some(cutoff);
        self
    }

    /// 페이지 크기를 설정합니다.
    pub fn page_size(mut self, size: usize) -> Self {
        self.config.selection.page_size = size;
        self
    }

    /// 항상 재처리 여부를 설정합니다.
    pub fn always_process(mut self, always: bool) -> Self {
        self.config.selection.always_process = always;
        self
    }

    /// FAILURE 재처리 여부를 설정합니다.
    pub fn redo_failures(mut self, redo: bool) -> Self {
        self.config.selection.redo_failures = redo;
        self
    }

    /// 재시도 대기 시간(시간)을 설정합니다.
    pub fn retry_window_hours(mut self, hours: u64) -> Self {
        self.config.selection.retry_window_hours = hours;
        self
    }

    /// 집계 방식을 설정합니다.
    pub fn counting_mode(mut self, mode: CountingMode) -> Self {
        self.config.selection.counting_mode = mode;
        self
    }

    /// 서버 URL을 설정합니다.
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.config.server.url = url.into();
        self
    }

    /// 서버 설정 전체를 교체합니다.
    pub fn server(mut self, server: ServerConfig) -> Self {
        self.config.server = server;
        self
    }

    /// 프로젝트 버전 이름을 설정합니다.
    pub fn project_version(mut self, version: impl Into<String>) -> Self {
        self.config.project_version = version.into();
        self
    }

    /// 폴링 초기 간격(밀리초)을 설정합니다.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// 설정을 검증하고 빌드합니다.
    pub fn build(self) -> Result<InspectTaskConfig, ScannerError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn split_patterns(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}
