//! 외부 호출 재시도 정책
//!
//! 임베딩/LLM 호출은 호출마다 타임아웃을 걸고, 타임아웃과 일시적 장애는
//! 지수 백오프로 제한된 횟수만큼 재시도한 뒤 호출자에게 돌려줍니다.

use std::future::Future;
use std::time::Duration;

use crate::error::{RagError, Result};

/// 재시도 정책
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 최대 재시도 횟수 (첫 시도 제외)
    pub max_retries: u32,
    /// 첫 재시도 전 대기 시간 (이후 2배씩 증가)
    pub initial_backoff: Duration,
    /// 호출 1회당 타임아웃
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(2000),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// `op`을 정책에 따라 실행
///
/// * 재시도 대상이 아닌 에러는 즉시 반환합니다.
/// * 타임아웃은 `on_timeout`이 만든 에러로 바뀌며 재시도 대상입니다.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    on_timeout: fn(String) -> RagError,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        let err = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => on_timeout(format!("{} timed out after {:?}", what, policy.timeout)),
        };

        if !err.is_retryable() || attempt >= policy.max_retries {
            return Err(err);
        }

        let backoff = policy.backoff(attempt);
        tracing::warn!(
            "{} failed: {}. Retrying in {:?} (attempt {}/{})",
            what,
            err,
            backoff,
            attempt + 1,
            policy.max_retries
        );
        tokio::time::sleep(backoff).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(3), "embed", RagError::EmbeddingUnavailable, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(RagError::EmbeddingUnavailable("503".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> =
            with_retry(&fast_policy(3), "embed", RagError::EmbeddingUnavailable, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RagError::EmbeddingInvalidInput("empty".into())) }
            })
            .await;

        assert!(matches!(result, Err(RagError::EmbeddingInvalidInput(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bounded_retry_surfaces_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast_policy(2), "chat", RagError::LlmUnavailable, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RagError::LlmUnavailable("connection refused".into())) }
        })
        .await;

        assert!(matches!(result, Err(RagError::LlmUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_maps_to_transient_kind() {
        let policy = RetryPolicy {
            max_retries: 1,
            initial_backoff: Duration::from_millis(1),
            timeout: Duration::from_millis(10),
        };
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&policy, "chat", RagError::LlmUnavailable, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
        })
        .await;

        match result {
            Err(RagError::LlmUnavailable(msg)) => assert!(msg.contains("timed out")),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
