#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod metrics;
pub mod task;
pub mod types;

// --- 주요 타입 re-export ---
// 각 모듈의 핵심 타입을 크레이트 루트에서 바로 사용할 수 있도록 합니다.

// 에러
pub use error::{ConfigError, StorageError, TaskError, VaultscanError};

// 설정
pub use config::{
    GeneralConfig, InspectConfig, ScanConfig, SelectionConfig, ServerConfig, VaultscanConfig,
};

// 태스크 trait
pub use task::{
    DynRepositoryTask, RepositoryTask, TaskInfo, TaskKind, TaskOutcome, TaskRegistry, TaskReport,
};

// 도메인 타입
pub use types::{PackageType, Repository, Severity};
