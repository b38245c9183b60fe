use std::future::Future;
use std::time::Duration;

use crate::error::AppError;

/// 锁争用重试策略
///
/// 包住一个以干净事务开头的工作单元：遇到死锁或锁等待超时按
/// `min(max_delay, base_delay * 2^attempt)` 退避后重试，其余错误立刻上抛。
/// 工作单元失败时整个事务回滚，所以重复执行不会留下半截副作用。
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// 第 attempt 次重试前的退避时长（attempt 从 1 开始）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        exp.min(self.max_delay)
    }
}

/// 以重试策略执行事务性工作单元
///
/// 只有 `AppError::Contention` 会触发重试；重试耗尽后返回独立的
/// `AppError::RetryExhausted`，与底层原因区分开。
pub async fn execute_with_retry<T, F, Fut>(policy: &RetryPolicy, mut unit: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt = 0u32;

    loop {
        match unit().await {
            Err(AppError::Contention(reason)) => {
                attempt += 1;
                if attempt >= policy.max_retries {
                    tracing::warn!(
                        "锁争用重试耗尽 ({}/{}): {}",
                        attempt,
                        policy.max_retries,
                        reason
                    );
                    return Err(AppError::RetryExhausted);
                }

                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    "检测到锁争用，第 {}/{} 次重试，退避 {:?}: {}",
                    attempt,
                    policy.max_retries,
                    delay,
                    reason
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn test_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        }
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(10), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn succeeds_without_contention() {
        let result = execute_with_retry(&test_policy(), || async { Ok::<_, AppError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn retries_contention_then_succeeds_with_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let policy = test_policy();

        let started = Instant::now();
        let result = execute_with_retry(&policy, move || {
            let calls = calls_clone.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AppError::Contention("deadlock detected".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 前两次失败的退避：base*2 + base*4
        assert!(started.elapsed() >= policy.base_delay * 2 + policy.base_delay * 4);
    }

    #[tokio::test]
    async fn exhaustion_yields_dedicated_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<(), AppError> = execute_with_retry(&test_policy(), move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::Contention("lock wait timeout".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(AppError::RetryExhausted)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_contention_errors_propagate_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<(), AppError> = execute_with_retry(&test_policy(), move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::NotFound("不存在的行程".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
