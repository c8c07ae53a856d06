//! 분석 제출
//!
//! 제출 실패는 저장소 실행을 중단시키지 않습니다. 배치 전체 실패는
//! 모든 대상의 거부로 바뀌어 호출자가 아티팩트별 FAILURE로 기록합니다.

use tracing::{info, warn};
use uuid::Uuid;

use crate::client::{AnalysisClient, RejectedTarget, ScanSubmission, SubmissionHandle};
use crate::error::ClientError;
use crate::prepare::{GraphDocument, ScanTarget};

/// 수락된 아티팩트에 기록하는 설명
pub const AWAITING_CONFIRMATION: &str = "Submitted, awaiting confirmation from the analysis server";

/// 그래프 제출 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphSubmission {
    /// 수락됨
    Accepted(SubmissionHandle),
    /// 거부됨 (업스트림 메시지)
    Rejected(ClientError),
}

/// 분석 제출기
pub struct Submitter<'a, A> {
    client: &'a A,
}

impl<'a, A: AnalysisClient> Submitter<'a, A> {
    pub fn new(client: &'a A) -> Self {
        Self { client }
    }

    /// 스캔 대상을 제출합니다.
    ///
    /// 서버 응답에 수락도 거부도 없는 대상은 거부로 취급합니다.
    pub async fn submit_scan(&self, targets: &[ScanTarget]) -> ScanSubmission {
        match self.client.submit_scan_targets(targets).await {
            Ok(mut submission) => {
                for target in targets {
                    let known = submission.handle.is_accepted(&target.name)
                        || submission.rejected.iter().any(|r| r.name == target.name);
                    if !known {
                        submission.rejected.push(RejectedTarget {
                            name: target.name.clone(),
                            error: ClientError::Rejected(
                                "target was not acknowledged by the server".to_owned(),
                            ),
                        });
                    }
                }
                info!(
                    token = %submission.handle.token,
                    accepted = submission.handle.accepted.len(),
                    rejected = submission.rejected.len(),
                    "scan targets submitted"
                );
                submission
            }
            Err(e) => {
                warn!(targets = targets.len(), error = %e, "scan submission failed");
                ScanSubmission {
                    handle: SubmissionHandle {
                        token: Uuid::nil().to_string(),
                        accepted: Vec::new(),
                    },
                    rejected: targets
                        .iter()
                        .map(|t| RejectedTarget {
                            name: t.name.clone(),
                            error: e.clone(),
                        })
                        .collect(),
                }
            }
        }
    }

    /// 의존성 그래프를 제출합니다.
    pub async fn submit_graph(&self, document: &GraphDocument) -> GraphSubmission {
        let unit = document.unit_name();
        match self.client.submit_graph(document).await {
            Ok(handle) if handle.is_accepted(&unit) => {
                info!(
                    token = %handle.token,
                    project = %unit,
                    components = document.components.len(),
                    "dependency graph submitted"
                );
                GraphSubmission::Accepted(handle)
            }
            Ok(_) => GraphSubmission::Rejected(ClientError::Rejected(format!(
                "graph '{unit}' was not acknowledged by the server"
            ))),
            Err(e) => {
                warn!(project = %unit, error = %e, "graph submission failed");
                GraphSubmission::Rejected(e)
            }
        }
    }
}
