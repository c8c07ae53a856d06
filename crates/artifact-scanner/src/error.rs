//! 아티팩트 스캐너 에러 타입
//!
//! [`ScannerError`]는 스캐너 모듈 내에서 발생할 수 있는 모든 에러를 나타냅니다.
//! `From<ScannerError> for VaultscanError` 구현을 통해 `?` 연산자로
//! 상위 에러 타입으로 전파됩니다.
//!
//! # 에러 분류
//!
//! - **치명적 (저장소 실행 중단)**: `Catalog`, `Connection`, `WorkDir`, `Cancelled`, `Config`
//!   (자격 증명 문제는 연결 시점의 `Connection`으로만 치명적)
//! - **아티팩트 단위 (FAILURE 기록 후 계속)**: `Blob`, `Client`, `LedgerCorrupt`, `Io`,
//!   `ComponentUnknown`, `Ledger`
//!
//! [`ScannerError::is_fatal`]이 이 분류를 판정합니다.

use vaultscan_core::error::{ConfigError, StorageError, TaskError, VaultscanError};

/// 분석 서버 클라이언트 에러
///
/// 외부 분석 서비스 호출 실패를 나타냅니다. 메시지는 그대로 원장에 기록됩니다.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// 자격 증명 누락 또는 거부
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// 요청 대상을 찾을 수 없음
    #[error("not found: {0}")]
    NotFound(String),

    /// 서버 측 할당량 초과
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// 네트워크/일시적 오류
    #[error("transient failure: {0}")]
    Transient(String),

    /// 서버가 요청을 거부함
    #[error("rejected: {0}")]
    Rejected(String),
}

/// 아티팩트 스캐너 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum ScannerError {
    /// 카탈로그 조회 실패
    #[error("catalog query failed for '{repository}': {reason}")]
    Catalog {
        /// 저장소 키
        repository: String,
        /// 실패 사유
        reason: String,
    },

    /// 상태 패널 기록 실패
    #[error("ledger write failed for '{artifact}': {reason}")]
    Ledger {
        /// 아티팩트 이름
        artifact: String,
        /// 실패 사유
        reason: String,
    },

    /// 원장에 저장된 값이 손상됨
    #[error("corrupt ledger value on '{artifact}': {label}='{value}'")]
    LedgerCorrupt {
        /// 아티팩트 이름
        artifact: String,
        /// 레이블 키
        label: String,
        /// 저장된 값
        value: String,
    },

    /// 블롭 내용 조회 실패
    #[error("blob unavailable for '{artifact}': {reason}")]
    Blob {
        /// 아티팩트 이름
        artifact: String,
        /// 실패 사유
        reason: String,
    },

    /// 분석 서버 호출 실패
    #[error("analysis client error: {0}")]
    Client(#[from] ClientError),

    /// 분석 서버 연결 실패 (자격 증명 누락 포함)
    #[error("analysis server connection failed: {0}")]
    Connection(String),

    /// 인스펙션 대상 컴포넌트 좌표 누락
    #[error("component coordinates missing for '{artifact}'")]
    ComponentUnknown {
        /// 아티팩트 이름
        artifact: String,
    },

    /// 작업 디렉토리 생성 실패
    #[error("working directory '{path}' unavailable: {reason}")]
    WorkDir {
        /// 작업 디렉토리 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 파일 I/O 에러
    #[error("io error: {path}: {source}")]
    Io {
        /// 관련 파일 경로
        path: String,
        /// 원본 I/O 에러
        source: std::io::Error,
    },

    /// 취소됨
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl ScannerError {
    /// 저장소 실행 전체를 중단해야 하는 에러인지 반환합니다.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Catalog { .. }
            | Self::Connection(_)
            | Self::WorkDir { .. }
            | Self::Config { .. }
            | Self::Cancelled(_) => true,
            Self::Ledger { .. }
            | Self::LedgerCorrupt { .. }
            | Self::Blob { .. }
            | Self::Client(_)
            | Self::ComponentUnknown { .. }
            | Self::Io { .. } => false,
        }
    }
}

impl From<ScannerError> for VaultscanError {
    fn from(err: ScannerError) -> Self {
        match err {
            ScannerError::Catalog { .. } => {
                VaultscanError::Storage(StorageError::Query(err.to_string()))
            }
            ScannerError::Ledger { .. } | ScannerError::LedgerCorrupt { .. } => {
                VaultscanError::Storage(StorageError::Write(err.to_string()))
            }
            ScannerError::WorkDir { .. } => {
                VaultscanError::Storage(StorageError::WorkDir(err.to_string()))
            }
            ScannerError::Config { field, reason } => {
                VaultscanError::Config(ConfigError::InvalidValue { field, reason })
            }
            ScannerError::Connection(msg) => {
                VaultscanError::Task(TaskError::ServerUnavailable(msg))
            }
            ScannerError::Client(ClientError::Unauthorized(msg)) => VaultscanError::Task(
                TaskError::ServerUnavailable(format!("unauthorized: {msg}")),
            ),
            ScannerError::Io { source, .. } => VaultscanError::Io(source),
            other => VaultscanError::Task(TaskError::Interrupted {
                repository: String::new(),
                reason: other.to_string(),
            }),
        }
    }
}
