//! 적격성 필터 — 범위 판정과 재처리 판정
//!
//! 1단계(범위): 파일 이름 glob, 전체 경로 정규식, cutoff, (스캔 모드) 블롭 존재.
//! 2단계(재처리): 원장에 기록된 마지막 상태와 수정 시각을 비교합니다.
//!
//! [`EligibilityFilter::evaluate`]는 (아티팩트 스냅샷, 설정, 평가 시각)만의
//! 순수 함수입니다. 같은 입력이면 항상 같은 판정을 돌려줍니다.

use std::fmt;

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;

use crate::catalog::Artifact;
use crate::config::SelectionSettings;
use crate::error::ScannerError;
use crate::ledger::{LedgerEntry, TaskStatus};

/// 필터 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    /// 바이너리 스캔 (블롭 필수)
    Scan,
    /// 인스펙션 (카탈로그 메타데이터만 사용)
    Inspection,
}

/// 처리 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessReason {
    /// 처리 기록 없음
    NeverProcessed,
    /// 마지막 처리 이후 수정됨
    ModifiedSinceLastRun,
    /// 항상 재처리 설정
    Forced,
    /// FAILURE 재처리 설정
    RedoFailure,
    /// PENDING / COMPONENT_NOT_FOUND 재시도 대기 시간 경과
    RetryWindowElapsed,
}

impl fmt::Display for ProcessReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NeverProcessed => write!(f, "never processed"),
            Self::ModifiedSinceLastRun => write!(f, "modified since last run"),
            Self::Forced => write!(f, "always process"),
            Self::RedoFailure => write!(f, "retrying failure"),
            Self::RetryWindowElapsed => write!(f, "retry window elapsed"),
        }
    }
}

/// 제외 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NameMismatch,
    PathMismatch,
    OlderThanCutoff,
    MissingBlob,
    /// 최신 상태로 재처리 불필요
    UpToDate(TaskStatus),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NameMismatch => write!(f, "file name does not match patterns"),
            Self::PathMismatch => write!(f, "path does not match pattern"),
            Self::OlderThanCutoff => write!(f, "modified before cutoff"),
            Self::MissingBlob => write!(f, "no blob reference"),
            Self::UpToDate(status) => write!(f, "up to date ({status})"),
        }
    }
}

/// 판정 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Process(ProcessReason),
    Skip(SkipReason),
}

impl Verdict {
    pub fn is_process(&self) -> bool {
        matches!(self, Self::Process(_))
    }
}

/// 적격성 필터
#[derive(Debug, Clone)]
pub struct EligibilityFilter {
    mode: FilterMode,
    names: GlobSet,
    path: Option<Regex>,
    cutoff: Option<DateTime<Utc>>,
    always_process: bool,
    redo_failures: bool,
    retry_window: chrono::Duration,
}

impl EligibilityFilter {
    /// 선택 설정에서 필터를 만듭니다.
    ///
    /// 패턴이 하나도 없거나 glob/정규식이 잘못되었으면 설정 에러입니다.
    pub fn new(selection: &SelectionSettings, mode: FilterMode) -> Result<Self, ScannerError> {
        if selection.name_patterns.is_empty() {
            return Err(ScannerError::Config {
                field: "name_patterns".to_owned(),
                reason: "no file name patterns configured".to_owned(),
            });
        }

        let mut builder = GlobSetBuilder::new();
        for pattern in &selection.name_patterns {
            let glob = Glob::new(pattern).map_err(|e| ScannerError::Config {
                field: "name_patterns".to_owned(),
                reason: format!("invalid glob '{pattern}': {e}"),
            })?;
            builder.add(glob);
        }
        let names = builder.build().map_err(|e| ScannerError::Config {
            field: "name_patterns".to_owned(),
            reason: e.to_string(),
        })?;

        let path = if selection.path_pattern.trim().is_empty() {
            None
        } else {
            Some(
                Regex::new(&selection.path_pattern).map_err(|e| ScannerError::Config {
                    field: "path_pattern".to_owned(),
                    reason: e.to_string(),
                })?,
            )
        };

        Ok(Self {
            mode,
            names,
            path,
            cutoff: selection.cutoff,
            always_process: selection.always_process,
            redo_failures: selection.redo_failures,
            retry_window: selection.retry_window(),
        })
    }

    /// 파일 이름이 glob 목록에 맞는지
    pub fn matches_name(&self, file_name: &str) -> bool {
        self.names.is_match(file_name)
    }

    /// 전체 경로가 정규식에 맞는지 (정규식이 없으면 항상 참)
    pub fn matches_path(&self, full_name: &str) -> bool {
        self.path.as_ref().is_none_or(|re| re.is_match(full_name))
    }

    /// 범위 판정. 범위 밖이면 제외 사유를 반환합니다.
    pub fn check_scope(&self, artifact: &Artifact) -> Option<SkipReason> {
        if !self.matches_name(artifact.file_name()) {
            return Some(SkipReason::NameMismatch);
        }
        if !self.matches_path(&artifact.name) {
            return Some(SkipReason::PathMismatch);
        }
        if self.cutoff.is_some_and(|cutoff| artifact.modified < cutoff) {
            return Some(SkipReason::OlderThanCutoff);
        }
        if self.mode == FilterMode::Scan && artifact.blob.is_none() {
            return Some(SkipReason::MissingBlob);
        }
        None
    }

    /// 원장 항목 기준 재처리 판정
    pub fn reprocess_reason(
        &self,
        artifact: &Artifact,
        entry: &LedgerEntry,
        now: DateTime<Utc>,
    ) -> Option<ProcessReason> {
        if self.always_process {
            return Some(ProcessReason::Forced);
        }

        let (Some(status), Some(finished)) = (entry.status, entry.finished) else {
            return Some(ProcessReason::NeverProcessed);
        };

        if artifact.modified > finished {
            return Some(ProcessReason::ModifiedSinceLastRun);
        }

        if status == TaskStatus::Failure && self.redo_failures {
            return Some(ProcessReason::RedoFailure);
        }

        if status.is_retryable_after_window() {
            let due = finished.checked_add_signed(self.retry_window);
            if due.is_some_and(|due| due < now) {
                return Some(ProcessReason::RetryWindowElapsed);
            }
        }

        None
    }

    /// 전체 판정
    ///
    /// 원장 항목이 손상되었으면 `LedgerCorrupt`를 반환합니다. 호출자는 이를
    /// 아티팩트 단위 실패로 기록합니다.
    pub fn evaluate(&self, artifact: &Artifact, now: DateTime<Utc>) -> Result<Verdict, ScannerError> {
        if let Some(skip) = self.check_scope(artifact) {
            return Ok(Verdict::Skip(skip));
        }

        let entry = LedgerEntry::from_panel(&artifact.name, &artifact.panel)?;
        Ok(match self.reprocess_reason(artifact, &entry, now) {
            Some(reason) => Verdict::Process(reason),
            None => Verdict::Skip(SkipReason::UpToDate(
                entry.status.unwrap_or(TaskStatus::Success),
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::ledger::{format_timestamp, labels};
    use vaultscan_core::config::parse_cutoff_date;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn selection(patterns: &[&str]) -> SelectionSettings {
        SelectionSettings {
            name_patterns: patterns.iter().map(|p| (*p).to_owned()).collect(),
            ..SelectionSettings::default()
        }
    }

    fn filter(selection: &SelectionSettings) -> EligibilityFilter {
        EligibilityFilter::new(selection, FilterMode::Scan).unwrap()
    }

    fn with_status(mut artifact: Artifact, status: &str, finished: DateTime<Utc>) -> Artifact {
        artifact.panel.set(labels::TASK_STATUS, status);
        artifact
            .panel
            .set(labels::TASK_FINISHED_TIME, format_timestamp(finished));
        artifact
    }

    #[test]
    fn no_patterns_is_setup_error() {
        let err = EligibilityFilter::new(&selection(&[]), FilterMode::Scan).unwrap_err();
        assert!(matches!(err, ScannerError::Config { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn name_globs_from_comma_list() {
        let mut sel = SelectionSettings::default();
        sel.name_patterns = "*.zip, *.brb"
            .split(',')
            .map(|s| s.trim().to_owned())
            .collect();
        let f = filter(&sel);
        assert!(f.matches_name("test.zip"));
        assert!(f.matches_name("test.brb"));
        assert!(!f.matches_name("test.fake"));
    }

    #[test]
    fn name_match_is_case_sensitive() {
        let f = filter(&selection(&["*.war"]));
        assert!(f.matches_name("app.war"));
        assert!(!f.matches_name("APP.WAR"));
    }

    #[test]
    fn name_match_uses_file_name_only() {
        let f = filter(&selection(&["app-*.war"]));
        let a = Artifact::new("repo", "com/acme/app-1.0.war", at(2020, 1, 1));
        assert_eq!(f.check_scope(&a), None);
    }

    #[test]
    fn blank_path_pattern_matches_everything() {
        let f = filter(&selection(&["*"]));
        assert!(f.matches_path("any/thing/at/all"));
    }

    #[test]
    fn path_pattern_applies_to_full_name() {
        let mut sel = selection(&["*.war"]);
        sel.path_pattern = "^com/acme/".to_owned();
        let f = filter(&sel);
        let inside = Artifact::new("repo", "com/acme/a.war", at(2020, 1, 1));
        let outside = Artifact::new("repo", "org/other/a.war", at(2020, 1, 1));
        assert_eq!(f.check_scope(&inside), None);
        assert_eq!(f.check_scope(&outside), Some(SkipReason::PathMismatch));
    }

    #[test]
    fn cutoff_excludes_older_artifacts() {
        let mut sel = selection(&["*.zip"]);
        sel.cutoff = Some(parse_cutoff_date("2016-01-01T00:00:00.000").unwrap());
        let f = filter(&sel);

        let old = Artifact::new("repo", "old.zip", at(2015, 12, 31));
        let new = Artifact::new("repo", "new.zip", at(2016, 1, 2));
        assert_eq!(f.check_scope(&old), Some(SkipReason::OlderThanCutoff));
        assert_eq!(f.check_scope(&new), None);
    }

    #[test]
    fn missing_blob_only_matters_in_scan_mode() {
        let sel = selection(&["*.jar"]);
        let a = Artifact::new("repo", "lib.jar", at(2020, 1, 1)).without_blob();

        let scan = EligibilityFilter::new(&sel, FilterMode::Scan).unwrap();
        assert_eq!(scan.check_scope(&a), Some(SkipReason::MissingBlob));

        let inspect = EligibilityFilter::new(&sel, FilterMode::Inspection).unwrap();
        assert_eq!(inspect.check_scope(&a), None);
    }

    #[test]
    fn never_processed_is_eligible() {
        let f = filter(&selection(&["*.zip"]));
        let a = Artifact::new("repo", "a.zip", at(2020, 1, 1));
        assert_eq!(
            f.evaluate(&a, at(2020, 1, 2)).unwrap(),
            Verdict::Process(ProcessReason::NeverProcessed)
        );
    }

    #[test]
    fn success_is_skipped_until_modified() {
        let f = filter(&selection(&["*.zip"]));
        let a = with_status(
            Artifact::new("repo", "a.zip", at(2020, 1, 1)),
            "SUCCESS",
            at(2020, 1, 2),
        );
        assert_eq!(
            f.evaluate(&a, at(2021, 1, 1)).unwrap(),
            Verdict::Skip(SkipReason::UpToDate(TaskStatus::Success))
        );

        let mut modified = a.clone();
        modified.modified = at(2020, 1, 3);
        assert_eq!(
            f.evaluate(&modified, at(2021, 1, 1)).unwrap(),
            Verdict::Process(ProcessReason::ModifiedSinceLastRun)
        );
    }

    #[test]
    fn always_process_forces_success() {
        let mut sel = selection(&["*.zip"]);
        sel.always_process = true;
        let f = filter(&sel);
        let a = with_status(
            Artifact::new("repo", "a.zip", at(2020, 1, 1)),
            "SUCCESS",
            at(2020, 1, 2),
        );
        assert_eq!(
            f.evaluate(&a, at(2020, 1, 3)).unwrap(),
            Verdict::Process(ProcessReason::Forced)
        );
    }

    #[test]
    fn failure_requires_redo_flag() {
        let a = with_status(
            Artifact::new("repo", "a.zip", at(2020, 1, 1)),
            "FAILURE",
            at(2020, 1, 2),
        );
        let f = filter(&selection(&["*.zip"]));
        assert!(!f.evaluate(&a, at(2020, 1, 3)).unwrap().is_process());

        let mut sel = selection(&["*.zip"]);
        sel.redo_failures = true;
        let f = filter(&sel);
        assert_eq!(
            f.evaluate(&a, at(2020, 1, 3)).unwrap(),
            Verdict::Process(ProcessReason::RedoFailure)
        );
    }

    #[test]
    fn pending_older_than_one_day_is_eligible_again() {
        let f = filter(&selection(&["*.zip"]));
        let finished = Utc.with_ymd_and_hms(2020, 1, 2, 10, 0, 0).unwrap();
        let a = with_status(
            Artifact::new("repo", "a.zip", at(2020, 1, 1)),
            "PENDING",
            finished,
        );

        let within = finished + chrono::Duration::hours(23);
        assert!(!f.evaluate(&a, within).unwrap().is_process());

        let after = finished + chrono::Duration::hours(25);
        assert_eq!(
            f.evaluate(&a, after).unwrap(),
            Verdict::Process(ProcessReason::RetryWindowElapsed)
        );
    }

    #[test]
    fn component_not_found_follows_retry_window() {
        let f = filter(&selection(&["*.zip"]));
        let a = with_status(
            Artifact::new("repo", "a.zip", at(2020, 1, 1)),
            "COMPONENT_NOT_FOUND",
            at(2020, 1, 2),
        );
        assert!(f.evaluate(&a, at(2020, 1, 4)).unwrap().is_process());
    }

    #[test]
    fn corrupt_status_is_reported() {
        let f = filter(&selection(&["*.zip"]));
        let mut a = Artifact::new("repo", "a.zip", at(2020, 1, 1));
        a.panel.set(labels::TASK_STATUS, "WHATEVER");
        let err = f.evaluate(&a, at(2020, 1, 2)).unwrap_err();
        assert!(matches!(err, ScannerError::LedgerCorrupt { .. }));
    }

    #[test]
    fn evaluation_is_idempotent() {
        let mut sel = selection(&["*.zip"]);
        sel.redo_failures = true;
        let f = filter(&sel);
        let a = with_status(
            Artifact::new("repo", "a.zip", at(2020, 1, 1)),
            "FAILURE",
            at(2020, 1, 2),
        );
        let now = at(2020, 2, 1);
        let first = f.evaluate(&a, now).unwrap();
        for _ in 0..5 {
            assert_eq!(f.evaluate(&a, now).unwrap(), first);
        }
    }
}
