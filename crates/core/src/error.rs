//! 에러 타입 — 도메인별 에러 정의

/// Vaultscan 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum VaultscanError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 저장소 태스크 실행 에러
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// 카탈로그/스토리지 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 저장소 태스크 에러
///
/// 저장소 단위 실행을 중단시키는 에러입니다.
/// 아티팩트 단위 실패는 상태 원장에 기록되며 여기로 올라오지 않습니다.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// 동일한 이름의 태스크가 이미 등록됨
    #[error("task already registered: {name}")]
    AlreadyRegistered { name: String },

    /// 태스크를 찾을 수 없음
    #[error("task not found: {name}")]
    NotFound { name: String },

    /// 태스크가 중단됨 (취소 또는 치명적 에러)
    #[error("task interrupted on repository '{repository}': {reason}")]
    Interrupted { repository: String, reason: String },

    /// 분석 서버 연결/인증 실패
    #[error("analysis server unavailable: {0}")]
    ServerUnavailable(String),
}

/// 스토리지 에러
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// 카탈로그 조회 실패
    #[error("catalog query failed: {0}")]
    Query(String),

    /// 상태 패널 기록 실패
    #[error("status write failed: {0}")]
    Write(String),

    /// 작업 디렉토리 생성 실패
    #[error("working directory unavailable: {0}")]
    WorkDir(String),
}
