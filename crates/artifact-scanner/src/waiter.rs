//! 완료 대기 — 분석 서버의 처리 확인을 기다림
//!
//! 제한 시간 안에서 폴링과 대기를 반복하며, 대기 간격은 두 배씩 늘어
//! [`MAX_POLL_INTERVAL`]에서 멈춥니다. 취소 토큰은 폴링 요청과 대기 중
//! 모두 관찰됩니다.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vaultscan_core::metrics as m;

use crate::client::{AnalysisClient, SubmissionHandle};
use crate::error::ScannerError;

/// 폴링 간격 상한
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// 대기 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// 모든 단위가 확인됨
    Complete,
    /// 일부만 확인된 채 제한 시간 초과
    Partial {
        confirmed: Vec<String>,
        missing: Vec<String>,
    },
    /// 하나도 확인되지 않은 채 제한 시간 초과
    TimedOut,
}

impl WaitOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial { .. } => "partial",
            Self::TimedOut => "timed_out",
        }
    }
}

/// 완료 대기기
#[derive(Debug, Clone)]
pub struct CompletionWaiter {
    timeout: Duration,
    initial_interval: Duration,
}

impl CompletionWaiter {
    pub fn new(timeout: Duration, initial_interval: Duration) -> Self {
        Self {
            timeout,
            initial_interval,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 배치 전체에 기록하는 미확인 메시지
    pub fn unconfirmed_message(&self) -> String {
        format!(
            "The analysis server did not confirm processing within {} seconds",
            self.timeout.as_secs()
        )
    }

    /// `expected`의 모든 이름이 확인될 때까지 기다립니다.
    ///
    /// 취소되면 `ScannerError::Cancelled`를 반환합니다. 폴링 에러는 기록만 하고
    /// 제한 시간까지 재시도합니다.
    pub async fn await_completion<A: AnalysisClient>(
        &self,
        client: &A,
        handle: &SubmissionHandle,
        expected: &[String],
        cancel: &CancellationToken,
    ) -> Result<WaitOutcome, ScannerError> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut interval = self.initial_interval;
        let mut confirmed: BTreeSet<String> = BTreeSet::new();

        let outcome = loop {
            let pending: Vec<String> = expected
                .iter()
                .filter(|n| !confirmed.contains(*n))
                .cloned()
                .collect();
            if pending.is_empty() {
                break WaitOutcome::Complete;
            }

            let now = Instant::now();
            if now >= deadline {
                break if confirmed.is_empty() {
                    WaitOutcome::TimedOut
                } else {
                    WaitOutcome::Partial {
                        confirmed: confirmed.iter().cloned().collect(),
                        missing: pending,
                    }
                };
            }
            let remaining = deadline - now;

            let poll = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(ScannerError::Cancelled(
                        "cancelled while waiting for the analysis server".to_owned(),
                    ));
                }
                // 제한 시간을 지키지 않는 폴링도 마감에서 끊는다
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(token = %handle.token, "notification poll exceeded the completion deadline");
                    continue;
                }
                result = client.poll_notifications(handle, &pending, expected.len(), remaining) => result,
            };

            match poll {
                Ok(names) => {
                    for name in names {
                        if expected.contains(&name) {
                            confirmed.insert(name);
                        }
                    }
                    debug!(
                        token = %handle.token,
                        confirmed = confirmed.len(),
                        expected = expected.len(),
                        "polled analysis server"
                    );
                    if confirmed.len() == expected.len() {
                        continue;
                    }
                }
                Err(e) => warn!(token = %handle.token, error = %e, "notification poll failed"),
            }

            let sleep_for = interval.min(deadline.saturating_duration_since(Instant::now()));
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(ScannerError::Cancelled(
                        "cancelled while waiting for the analysis server".to_owned(),
                    ));
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }
            interval = (interval * 2).min(MAX_POLL_INTERVAL);
        };

        let elapsed = started.elapsed();
        metrics::histogram!(m::COMPLETION_WAIT_DURATION_SECONDS, m::LABEL_OUTCOME => outcome.label())
            .record(elapsed.as_secs_f64());
        info!(
            token = %handle.token,
            outcome = outcome.label(),
            elapsed_secs = elapsed.as_secs(),
            "completion wait finished"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockAnalysisClient;

    fn handle() -> SubmissionHandle {
        SubmissionHandle {
            token: "t".to_owned(),
            accepted: vec!["a".to_owned(), "b".to_owned(), "c".to_owned()],
        }
    }

    fn names() -> Vec<String> {
        vec!["a".to_owned(), "b".to_owned(), "c".to_owned()]
    }

    fn waiter() -> CompletionWaiter {
        CompletionWaiter::new(Duration::from_secs(600), Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn complete_when_everything_confirmed() {
        let client = MockAnalysisClient::new();
        let outcome = waiter()
            .await_completion(&client, &handle(), &names(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Complete);
        assert_eq!(client.poll_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_after_timeout() {
        let client = MockAnalysisClient {
            confirm: Some(vec!["a".to_owned(), "b".to_owned()]),
            ..MockAnalysisClient::default()
        };
        let outcome = waiter()
            .await_completion(&client, &handle(), &names(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WaitOutcome::Partial {
                confirmed: vec!["a".to_owned(), "b".to_owned()],
                missing: vec!["c".to_owned()],
            }
        );
        assert!(client.poll_count() > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_when_nothing_confirmed() {
        let client = MockAnalysisClient {
            confirm: Some(Vec::new()),
            ..MockAnalysisClient::default()
        };
        let started = Instant::now();
        let outcome = waiter()
            .await_completion(&client, &handle(), &names(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_wait() {
        let client = MockAnalysisClient {
            confirm: Some(Vec::new()),
            ..MockAnalysisClient::default()
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let err = waiter()
            .await_completion(&client, &handle(), &names(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ScannerError::Cancelled(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_poll_is_cut_at_deadline() {
        // Given: a server that never answers the notification request
        let client = MockAnalysisClient {
            hang_polls: true,
            ..MockAnalysisClient::default()
        };
        let waiter = CompletionWaiter::new(Duration::from_secs(50), Duration::from_secs(1));
        let started = Instant::now();

        // When
        let outcome = tokio::time::timeout(
            Duration::from_secs(3600),
            waiter.await_completion(&client, &handle(), &names(), &CancellationToken::new()),
        )
        .await
        .expect("wait must end at its own deadline")
        .unwrap();

        // Then
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_secs(50));
        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(client.poll_count(), 1);
    }

    #[test]
    fn unconfirmed_message_names_timeout() {
        let w = CompletionWaiter::new(Duration::from_secs(600), Duration::from_secs(1));
        assert!(w.unconfirmed_message().contains("600 seconds"));
    }
}
