use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::types::ChatResult;

/// Bounded exponential backoff with jitter for transient store failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(25),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut f: F) -> ChatResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ChatResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match f().await {
                Err(error) if error.is_retryable() && attempt < self.attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(operation, attempt, ?delay, %error, "transient failure, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let exponential = base.saturating_mul(1 << (attempt - 1).min(10));
        let jitter = if base == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=base)
        };
        Duration::from_millis(exponential + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatError;
    use courier_database::DatabaseError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> ChatError {
        ChatError::Store(DatabaseError::Query(sqlx::Error::PoolTimedOut))
    }

    #[tokio::test]
    async fn test_retries_transient_errors_until_success() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));

        let result = policy
            .run("test", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(1));

        let result: ChatResult<()> = policy
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(1));

        let result: ChatResult<()> = policy
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ChatError::forbidden("no"))
            })
            .await;

        assert!(matches!(result, Err(ChatError::Forbidden { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_grows_with_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let first = policy.delay_for(1);
        let third = policy.delay_for(3);
        assert!(first >= Duration::from_millis(10) && first <= Duration::from_millis(20));
        assert!(third >= Duration::from_millis(40) && third <= Duration::from_millis(50));
    }
}
