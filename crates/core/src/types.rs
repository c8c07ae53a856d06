//! 도메인 타입 — 시스템 전역에서 사용되는 공통 타입
//!
//! 태스크 레지스트리와 스캐너가 공유하는 저장소/심각도 타입을 정의합니다.

use std::fmt;

use serde::{Deserialize, Serialize};

/// 저장소 패키지 형식
///
/// 인스펙션 모드에서 외부 의존성 식별자(external id)를 만드는 규칙이
/// 형식마다 다릅니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    /// Maven (group + name + version)
    Maven,
    /// npm (name + version)
    Npm,
    /// PyPI (name + version)
    Pypi,
    /// NuGet (name + version)
    Nuget,
    /// RubyGems (name + version)
    Rubygems,
    /// 형식 정보가 없는 일반 바이너리 저장소
    Raw,
}

impl PackageType {
    /// 외부 분석 서비스에서 사용하는 forge 이름을 반환합니다.
    pub fn forge(&self) -> &str {
        match self {
            Self::Maven => "maven",
            Self::Npm => "npmjs",
            Self::Pypi => "pypi",
            Self::Nuget => "nuget",
            Self::Rubygems => "rubygems",
            Self::Raw => "raw",
        }
    }

    /// group 좌표가 식별자에 포함되는 형식인지 반환합니다.
    pub fn uses_group(&self) -> bool {
        matches!(self, Self::Maven)
    }

    /// 문자열에서 패키지 형식을 파싱합니다 (대소문자 구분 없음).
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "maven" | "maven2" | "gradle" => Some(Self::Maven),
            "npm" | "npmjs" => Some(Self::Npm),
            "pypi" | "pip" | "python" => Some(Self::Pypi),
            "nuget" => Some(Self::Nuget),
            "rubygems" | "gems" => Some(Self::Rubygems),
            "raw" | "generic" => Some(Self::Raw),
            _ => None,
        }
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Maven => write!(f, "maven"),
            Self::Npm => write!(f, "npm"),
            Self::Pypi => write!(f, "pypi"),
            Self::Nuget => write!(f, "nuget"),
            Self::Rubygems => write!(f, "rubygems"),
            Self::Raw => write!(f, "raw"),
        }
    }
}

/// 아티팩트 저장소
///
/// 태스크 디스패치 단위입니다. 태스크는 `applies_to`로 처리 여부를 결정합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// 저장소 키 (예: `"maven-releases"`)
    pub key: String,
    /// 패키지 형식
    pub package_type: PackageType,
}

impl Repository {
    /// 새 저장소 디스크립터를 생성합니다.
    pub fn new(key: impl Into<String>, package_type: PackageType) -> Self {
        Self {
            key: key.into(),
            package_type,
        }
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.key, self.package_type)
    }
}

/// 취약점 심각도 레벨
///
/// `Ord` 구현으로 심각도 비교가 가능합니다 (`Low < Medium < High < Critical`).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Severity {
    /// 낮은 심각도
    #[default]
    Low,
    /// 중간 심각도
    Medium,
    /// 높은 심각도
    High,
    /// 치명적 — 즉시 대응 필요
    Critical,
}

impl Severity {
    /// 문자열에서 심각도를 파싱합니다.
    ///
    /// 대소문자를 구분하지 않습니다.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" | "med" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" | "crit" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "Low"),
            Self::Medium => write!(f, "Medium"),
            Self::High => write!(f, "High"),
            Self::Critical => write!(f, "Critical"),
        }
    }
}
