use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};

use crate::payment::GatewayError;

// ============================================================================
// Gateway Call Policy
// ============================================================================
//
// Every outbound gateway call carries a timeout. Idempotent reads get a
// bounded number of retries on transient failures; calls that mutate payment
// state are attempted exactly once so a lost response can never turn into a
// duplicate charge.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct CallPolicy {
    /// Upper bound for a single attempt
    pub timeout: Duration,
    /// Extra attempts allowed for idempotent reads
    pub read_retries: u32,
    /// Pause between read attempts
    pub retry_delay: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            read_retries: 1,
            retry_delay: Duration::from_millis(200),
        }
    }
}

impl CallPolicy {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    /// Run a state-mutating call once, bounded by the timeout
    pub async fn mutation<F, Fut, T>(&self, operation: F) -> Result<T, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        match timeout(self.timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(self.timeout)),
        }
    }

    /// Run an idempotent read, retrying transient failures up to `read_retries` times
    pub async fn read<F, Fut, T>(&self, mut operation: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = match timeout(self.timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Timeout(self.timeout)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt <= self.read_retries => {
                    tracing::warn!(
                        attempt = attempt,
                        error = %error,
                        delay_ms = self.retry_delay.as_millis() as u64,
                        "Gateway read failed, retrying"
                    );
                    sleep(self.retry_delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_millis(50),
            read_retries: 1,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_read_retries_once_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = fast_policy()
            .read(|| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(GatewayError::Unreachable("connection reset".into()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_read_gives_up_after_bounded_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = fast_policy()
            .read(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(GatewayError::Unreachable("down".into()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_read_does_not_retry_rejections() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = fast_policy()
            .read(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(GatewayError::Rejected("bad request".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(GatewayError::Rejected(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mutation_times_out_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = fast_policy()
            .mutation(|| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(500)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(GatewayError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
