//! 메트릭 상수 및 설명 등록
//!
//! 모든 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 스캐너 모듈은 이 상수를 사용하여 `metrics::counter!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `vaultscan_`
//! - 접미어: `_total` (counter), `_seconds` (histogram)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(vaultscan_core::metrics::ARTIFACTS_SKIPPED_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 태스크 레이블 키 (scan, inspection)
pub const LABEL_TASK: &str = "task";

/// 저장소 레이블 키
pub const LABEL_REPOSITORY: &str = "repository";

/// 대기 결과 레이블 키 (complete, partial, timed_out, cancelled)
pub const LABEL_OUTCOME: &str = "outcome";

// ─── 오케스트레이터 메트릭 ─────────────────────────────────────────

/// 조회된 카탈로그 페이지 수 (counter)
pub const PAGES_FETCHED_TOTAL: &str = "vaultscan_pages_fetched_total";

/// 필터에 넘겨진 아티팩트 수 (counter)
pub const ARTIFACTS_EXAMINED_TOTAL: &str = "vaultscan_artifacts_examined_total";

/// 필터에서 제외된 아티팩트 수 (counter)
pub const ARTIFACTS_SKIPPED_TOTAL: &str = "vaultscan_artifacts_skipped_total";

/// 분석 서버에 제출된 아티팩트 수 (counter)
pub const ARTIFACTS_SUBMITTED_TOTAL: &str = "vaultscan_artifacts_submitted_total";

/// SUCCESS로 기록된 아티팩트 수 (counter)
pub const ARTIFACTS_SUCCEEDED_TOTAL: &str = "vaultscan_artifacts_succeeded_total";

/// FAILURE로 기록된 아티팩트 수 (counter)
pub const ARTIFACTS_FAILED_TOTAL: &str = "vaultscan_artifacts_failed_total";

/// COMPONENT_NOT_FOUND로 기록된 아티팩트 수 (counter)
pub const ARTIFACTS_COMPONENT_NOT_FOUND_TOTAL: &str =
    "vaultscan_artifacts_component_not_found_total";

/// 완료 대기 시간 (histogram, 초)
pub const COMPLETION_WAIT_DURATION_SECONDS: &str = "vaultscan_completion_wait_duration_seconds";

/// 저장소 실행 시간 (histogram, 초)
pub const REPOSITORY_RUN_DURATION_SECONDS: &str = "vaultscan_repository_run_duration_seconds";

/// 모든 메트릭의 설명을 등록합니다.
///
/// recorder 설치 후 한 번 호출합니다. recorder가 없으면 아무 일도 하지 않습니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_histogram};

    describe_counter!(
        PAGES_FETCHED_TOTAL,
        "Total number of catalog pages fetched"
    );
    describe_counter!(
        ARTIFACTS_EXAMINED_TOTAL,
        "Total number of artifacts evaluated by the eligibility filter"
    );
    describe_counter!(
        ARTIFACTS_SKIPPED_TOTAL,
        "Artifacts skipped by scope or re-processing rules"
    );
    describe_counter!(
        ARTIFACTS_SUBMITTED_TOTAL,
        "Artifacts accepted by the analysis service"
    );
    describe_counter!(
        ARTIFACTS_SUCCEEDED_TOTAL,
        "Artifacts reconciled with status SUCCESS"
    );
    describe_counter!(
        ARTIFACTS_FAILED_TOTAL,
        "Artifacts recorded with status FAILURE"
    );
    describe_counter!(
        ARTIFACTS_COMPONENT_NOT_FOUND_TOTAL,
        "Inspected artifacts missing from the analysis project"
    );
    describe_histogram!(
        COMPLETION_WAIT_DURATION_SECONDS,
        "Time spent waiting for the analysis service to confirm a batch"
    );
    describe_histogram!(
        REPOSITORY_RUN_DURATION_SECONDS,
        "Wall time of a single repository task run"
    );
}
