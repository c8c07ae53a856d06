//! 설정 관리 — vaultscan.toml 파싱 및 런타임 설정
//!
//! [`VaultscanConfig`]는 모든 태스크의 설정을 담는 최상위 구조체입니다.
//! 설정은 실행마다 불변 스냅샷으로 주입되며, 태스크는 이를 변경하지 않습니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`VAULTSCAN_SERVER_URL=https://...` 형식)
//! 3. 설정 파일 (`vaultscan.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), vaultscan_core::error::VaultscanError> {
//! use vaultscan_core::config::VaultscanConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = VaultscanConfig::load("vaultscan.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = VaultscanConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, VaultscanError};

/// 페이지 크기 상한
pub const MAX_PAGE_SIZE: usize = 100;

/// 기본 페이지 크기
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// cutoff 날짜 형식 (타임존 없는 형태는 UTC로 해석)
pub const CUTOFF_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Vaultscan 통합 설정
///
/// `vaultscan.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 태스크는 자기 섹션과 `[server]` 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultscanConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 분석 서버 연결 설정
    #[serde(default)]
    pub server: ServerConfig,
    /// 바이너리 스캔 태스크 설정
    #[serde(default)]
    pub scan: ScanConfig,
    /// 인스펙션 태스크 설정
    #[serde(default)]
    pub inspect: InspectConfig,
}

impl VaultscanConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, VaultscanError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, VaultscanError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VaultscanError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                VaultscanError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, VaultscanError> {
        toml::from_str(toml_str).map_err(|e| {
            VaultscanError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `VAULTSCAN_{SECTION}_{FIELD}`
    /// 예: `VAULTSCAN_SERVER_API_TOKEN=...`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "VAULTSCAN_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "VAULTSCAN_GENERAL_LOG_FORMAT");

        // Server
        override_string(&mut self.server.url, "VAULTSCAN_SERVER_URL");
        override_string(&mut self.server.api_token, "VAULTSCAN_SERVER_API_TOKEN");
        override_u64(&mut self.server.timeout_secs, "VAULTSCAN_SERVER_TIMEOUT_SECS");
        override_bool(&mut self.server.trust_cert, "VAULTSCAN_SERVER_TRUST_CERT");

        // Scan
        override_bool(&mut self.scan.enabled, "VAULTSCAN_SCAN_ENABLED");
        override_csv(&mut self.scan.repositories, "VAULTSCAN_SCAN_REPOSITORIES");
        override_selection(&mut self.scan.selection, "VAULTSCAN_SCAN");
        override_string(&mut self.scan.working_dir, "VAULTSCAN_SCAN_WORKING_DIR");
        override_u32(&mut self.scan.memory_mb, "VAULTSCAN_SCAN_MEMORY_MB");

        // Inspect
        override_bool(&mut self.inspect.enabled, "VAULTSCAN_INSPECT_ENABLED");
        override_csv(
            &mut self.inspect.repositories,
            "VAULTSCAN_INSPECT_REPOSITORIES",
        );
        override_selection(&mut self.inspect.selection, "VAULTSCAN_INSPECT");
        override_string(
            &mut self.inspect.project_version,
            "VAULTSCAN_INSPECT_PROJECT_VERSION",
        );
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), VaultscanError> {
        // log_level 검증
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        // log_format 검증
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        if self.scan.enabled || self.inspect.enabled {
            if self.server.url.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "server.url".to_owned(),
                    reason: "server url must not be empty when a task is enabled".to_owned(),
                }
                .into());
            }
            if self.server.timeout_secs == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "server.timeout_secs".to_owned(),
                    reason: "must be greater than 0".to_owned(),
                }
                .into());
            }
        }

        if self.scan.enabled {
            self.scan.selection.validate("scan")?;
            if self.scan.working_dir.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "scan.working_dir".to_owned(),
                    reason: "working directory must not be empty when scan is enabled"
                        .to_owned(),
                }
                .into());
            }
        }

        if self.inspect.enabled {
            self.inspect.selection.validate("inspect")?;
            if self.inspect.project_version.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "inspect.project_version".to_owned(),
                    reason: "project version must not be empty".to_owned(),
                }
                .into());
            }
        }

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// 분석 서버 연결 설정
///
/// 실행 시작 시점의 스냅샷으로 사용됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 분석 서버 URL
    pub url: String,
    /// API 토큰
    pub api_token: String,
    /// 요청 타임아웃 (초). 완료 대기 시간은 이 값의 5배입니다.
    pub timeout_secs: u64,
    /// 자체 서명 인증서 신뢰 여부
    pub trust_cert: bool,
}

impl ServerConfig {
    /// 자격 증명이 설정되어 있는지 반환합니다.
    pub fn has_credentials(&self) -> bool {
        !self.api_token.trim().is_empty()
    }

    /// API 토큰을 가린 사본을 반환합니다 (출력용).
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.has_credentials() {
            copy.api_token = "***REDACTED***".to_owned();
        }
        copy
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_token: String::new(),
            timeout_secs: 120,
            trust_cert: false,
        }
    }
}

/// 아티팩트 선택 설정 (스캔/인스펙션 공통)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// 파일 이름 glob 목록 (쉼표 구분, 예: `"*.war,*.zip"`)
    pub name_patterns: String,
    /// 전체 경로 정규식 (비어 있으면 모든 경로 허용)
    pub path_pattern: String,
    /// 이보다 오래된 아티팩트는 제외 (비어 있으면 제한 없음)
    pub cutoff_date: String,
    /// 페이지 크기 (1-100)
    pub page_size: usize,
    /// 원장 상태와 무관하게 항상 재처리
    pub always_process: bool,
    /// FAILURE 상태 아티팩트 재처리
    pub redo_failures: bool,
    /// PENDING / COMPONENT_NOT_FOUND 재시도 대기 시간 (시간)
    pub retry_window_hours: u64,
    /// 취약점 집계 방식 (sum, highest)
    pub counting_mode: String,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            name_patterns: String::new(),
            path_pattern: String::new(),
            cutoff_date: String::new(),
            page_size: DEFAULT_PAGE_SIZE,
            always_process: false,
            redo_failures: false,
            retry_window_hours: 24,
            counting_mode: "sum".to_owned(),
        }
    }
}

impl SelectionConfig {
    /// 쉼표로 구분된 glob 목록을 분리합니다 (공백 제거, 빈 항목 무시).
    pub fn name_pattern_list(&self) -> Vec<String> {
        self.name_patterns
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    }

    fn validate(&self, section: &str) -> Result<(), VaultscanError> {
        if self.name_pattern_list().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("{section}.name_patterns"),
                reason: "at least one file name pattern is required".to_owned(),
            }
            .into());
        }

        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::InvalidValue {
                field: format!("{section}.page_size"),
                reason: format!("must be 1-{MAX_PAGE_SIZE}"),
            }
            .into());
        }

        let valid_modes = ["sum", "highest"];
        if !valid_modes.contains(&self.counting_mode.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: format!("{section}.counting_mode"),
                reason: format!("must be one of: {}", valid_modes.join(", ")),
            }
            .into());
        }

        if !self.cutoff_date.trim().is_empty() {
            parse_cutoff_date(&self.cutoff_date).map_err(|reason| ConfigError::InvalidValue {
                field: format!("{section}.cutoff_date"),
                reason,
            })?;
        }

        Ok(())
    }
}

/// 바이너리 스캔 태스크 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 대상 저장소 키 목록 (비어 있으면 모든 저장소)
    pub repositories: Vec<String>,
    /// 아티팩트 선택 설정
    #[serde(flatten)]
    pub selection: SelectionConfig,
    /// 페이지별 임시 파일을 만드는 작업 디렉토리
    pub working_dir: String,
    /// 외부 스캐너 메모리 한도 (MB)
    pub memory_mb: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            repositories: Vec::new(),
            selection: SelectionConfig::default(),
            working_dir: "/var/lib/vaultscan/work".to_owned(),
            memory_mb: 4096,
        }
    }
}

/// 인스펙션 태스크 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 대상 저장소 키 목록 (비어 있으면 모든 저장소)
    pub repositories: Vec<String>,
    /// 아티팩트 선택 설정
    #[serde(flatten)]
    pub selection: SelectionConfig,
    /// 저장소 프로젝트에 사용할 버전 이름
    pub project_version: String,
}

impl Default for InspectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            repositories: Vec::new(),
            selection: SelectionConfig::default(),
            project_version: "inspection".to_owned(),
        }
    }
}

/// cutoff 날짜 문자열을 UTC 시각으로 파싱합니다.
///
/// RFC 3339 (`2016-01-01T00:00:00.000Z`) 또는 타임존 없는
/// `2016-01-01T00:00:00.000` 형식(UTC로 해석)을 허용합니다.
pub fn parse_cutoff_date(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, CUTOFF_DATE_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("'{raw}' is not a valid date ({CUTOFF_DATE_FORMAT}): {e}"))
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_selection(target: &mut SelectionConfig, prefix: &str) {
    override_string(
        &mut target.name_patterns,
        &format!("{prefix}_NAME_PATTERNS"),
    );
    override_string(&mut target.path_pattern, &format!("{prefix}_PATH_PATTERN"));
    override_string(&mut target.cutoff_date, &format!("{prefix}_CUTOFF_DATE"));
    override_usize(&mut target.page_size, &format!("{prefix}_PAGE_SIZE"));
    override_bool(
        &mut target.always_process,
        &format!("{prefix}_ALWAYS_PROCESS"),
    );
    override_bool(&mut target.redo_failures, &format!("{prefix}_REDO_FAILURES"));
    override_u64(
        &mut target.retry_window_hours,
        &format!("{prefix}_RETRY_WINDOW_HOURS"),
    );
    override_string(
        &mut target.counting_mode,
        &format!("{prefix}_COUNTING_MODE"),
    );
}

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}
