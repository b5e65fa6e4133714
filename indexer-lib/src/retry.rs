use crate::block_range::BlockRange;
use crate::config::RetryConfig;
use crate::error::SyncError;
use crate::log_source::{BlockHeightOracle, LogEntry, LogFilter, RangeLogFetcher};
use async_trait::async_trait;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bounds every call of the wrapped source with a timeout and retries transient failures
/// with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryingSource<S> {
    inner: S,
    config: RetryConfig,
    cancel: CancellationToken,
}

impl<S> RetryingSource<S> {
    pub fn new(inner: S, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Abandons the pending attempt or backoff with `SyncError::Cancelled` once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!(operation, attempt, "Cancellation requested, abandoning request");
                    return Err(SyncError::Cancelled);
                }
                result = timeout(self.config.request_timeout, call()) => {
                    result.unwrap_or(Err(SyncError::Timeout(self.config.request_timeout)))
                }
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_transient() => {
                    debug!(operation, %err, "Non-transient error, not retrying");
                    return Err(err);
                }
                Err(err) => err,
            };

            if attempt > self.config.max_retries {
                return Err(SyncError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.config.backoff_for(attempt - 1);
            warn!(
                operation,
                attempt,
                delay_ms = delay.as_millis(),
                "Request failed, retrying: {err}"
            );
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!(operation, attempt, "Cancellation requested during backoff");
                    return Err(SyncError::Cancelled);
                }
                _ = sleep(delay) => {}
            }
        }
    }
}

#[async_trait]
impl<S: BlockHeightOracle> BlockHeightOracle for RetryingSource<S> {
    async fn latest_block(&self) -> Result<u64, SyncError> {
        self.with_retry("latest_block", || self.inner.latest_block())
            .await
    }
}

#[async_trait]
impl<S: RangeLogFetcher> RangeLogFetcher for RetryingSource<S> {
    async fn fetch_range(
        &self,
        filter: &LogFilter,
        range: BlockRange,
    ) -> Result<Vec<LogEntry>, SyncError> {
        self.with_retry("fetch_range", || self.inner.fetch_range(filter, range))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeChain, test_filter};
    use std::time::Duration;
    use tokio::time::Instant;

    fn retry_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            request_timeout: Duration::from_secs(1),
            max_retries,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(250),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried_with_backoff() {
        let chain = FakeChain::new(500).with_logs_at(&[10]);
        chain.fail_next_fetch(SyncError::Query("busy".into()));
        chain.fail_next_fetch(SyncError::Connectivity("reset".into()));
        chain.fail_next_fetch(SyncError::Query("busy".into()));
        let source = RetryingSource::new(chain, retry_config(3));

        let started = Instant::now();
        let logs = source
            .fetch_range(&test_filter(), BlockRange::new(0, 20))
            .await
            .unwrap();

        assert_eq!(logs.len(), 1);
        assert_eq!(source.inner().fetches().len(), 4);
        // 100 + 200 + 250 (capped)
        assert_eq!(started.elapsed(), Duration::from_millis(550));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_attempts_and_last_error() {
        let chain = FakeChain::new(500);
        for _ in 0..3 {
            chain.fail_next_height(SyncError::Connectivity("refused".into()));
        }
        let source = RetryingSource::new(chain, retry_config(2));

        let err = source.latest_block().await.unwrap_err();
        match err {
            SyncError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, SyncError::Connectivity(_)));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(source.inner().height_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_error_is_not_retried() {
        let chain = FakeChain::new(500);
        chain.fail_next_fetch(SyncError::MalformedLog("missing log index"));
        let source = RetryingSource::new(chain, retry_config(5));

        let err = source
            .fetch_range(&test_filter(), BlockRange::new(0, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MalformedLog(_)));
        assert_eq!(source.inner().fetches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_range_is_rejected_without_request() {
        let source = RetryingSource::new(FakeChain::new(500), retry_config(5));
        let err = source
            .fetch_range(&test_filter(), BlockRange::new(11, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidRange(_)));
        assert!(source.inner().fetches().is_empty());
    }

    struct StalledOracle;

    #[async_trait]
    impl BlockHeightOracle for StalledOracle {
        async fn latest_block(&self) -> Result<u64, SyncError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_call_times_out() {
        let source = RetryingSource::new(StalledOracle, retry_config(1));
        let started = Instant::now();

        let err = source.latest_block().await.unwrap_err();
        match err {
            SyncError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, SyncError::Timeout(_)));
            }
            other => panic!("unexpected error {other:?}"),
        }
        // two timeouts plus one backoff
        assert_eq!(started.elapsed(), Duration::from_millis(2100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_cuts_backoff_short() {
        let chain = FakeChain::new(500);
        chain.fail_window_at(0);
        let cancel = CancellationToken::new();
        let config = RetryConfig {
            request_timeout: Duration::from_secs(10),
            max_retries: 5,
            initial_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(30),
        };
        let source =
            std::sync::Arc::new(RetryingSource::new(chain, config).with_cancellation(cancel.clone()));

        let started = Instant::now();
        let handle = tokio::spawn({
            let source = source.clone();
            async move {
                source
                    .fetch_range(&test_filter(), BlockRange::new(0, 10))
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(started.elapsed(), Duration::from_millis(100));
        assert_eq!(source.inner().fetches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_abandons_stalled_call() {
        let cancel = CancellationToken::new();
        let source = RetryingSource::new(StalledOracle, retry_config(3)).with_cancellation(cancel.clone());
        let started = Instant::now();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            cancel.cancel();
        });
        let err = source.latest_block().await.unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }
}
