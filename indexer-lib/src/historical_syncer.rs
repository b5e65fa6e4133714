use crate::block_range::BlockRange;
use crate::config::PhaseConfig;
use crate::error::SyncError;
use crate::handler::LogBatch;
use crate::log_source::{LogEntry, LogFilter, RangeLogFetcher};
use crate::metrics::SharedMetrics;
use crate::rate_limiter::{Pace, RateLimiter};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Backfill window position. Windows are `[from, from + blocks_per_query]` and follow each
/// other without gaps or overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillCursor {
    from_block: u64,
    to_block: u64,
    blocks_per_query: u64,
}

impl BackfillCursor {
    pub fn new(blocks_per_query: u64) -> Self {
        Self {
            from_block: 0,
            to_block: blocks_per_query,
            blocks_per_query,
        }
    }

    pub fn from_block(&self) -> u64 {
        self.from_block
    }

    /// The window to query next. The upper bound is not clamped to the target.
    pub fn window(&self) -> BlockRange {
        BlockRange::new(self.from_block, self.to_block)
    }

    pub fn is_past(&self, target_block: u64) -> bool {
        self.from_block > target_block
    }

    pub fn advance(&mut self) {
        self.from_block = self.to_block.saturating_add(1);
        self.to_block = self.from_block.saturating_add(self.blocks_per_query);
    }
}

/// Windows a backfill to `target_block` queries, in order.
pub fn backfill_windows(target_block: u64, blocks_per_query: u64) -> Vec<BlockRange> {
    let mut cursor = BackfillCursor::new(blocks_per_query);
    let mut windows = Vec::new();
    while !cursor.is_past(target_block) {
        windows.push(cursor.window());
        cursor.advance();
    }
    windows
}

/// First block the incremental phase queries: one past the newest observed log or one past
/// the backfill target, whichever is later.
pub fn incremental_start_block(max_observed_block: Option<u64>, target_block: u64) -> u64 {
    let after_target = target_block.saturating_add(1);
    max_observed_block.map_or(after_target, |max| max.saturating_add(1).max(after_target))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillStatus {
    Completed,
    /// Cancelled before the target was passed; `next_from` is the first unqueried block.
    Interrupted { next_from: u64 },
}

/// Everything a backfill accumulated.
#[derive(Debug)]
pub struct BackfillOutcome {
    pub status: BackfillStatus,
    pub target_block: u64,
    /// Non-empty batches, ascending by range.
    pub batches: Vec<LogBatch>,
    pub windows_queried: u64,
    pub max_block_number: Option<u64>,
}

impl BackfillOutcome {
    /// All logs in the order they were fetched.
    pub fn logs(&self) -> impl Iterator<Item = &LogEntry> {
        self.batches.iter().flat_map(|batch| batch.logs.iter())
    }

    pub fn log_count(&self) -> usize {
        self.batches.iter().map(|batch| batch.logs.len()).sum()
    }

    pub fn incremental_start(&self) -> u64 {
        incremental_start_block(self.max_block_number, self.target_block)
    }
}

/// A window failed for good. Carries the batches of the windows completed before it.
#[derive(Debug, Error)]
#[error("backfill failed at block {next_from}: {error}")]
pub struct BackfillError {
    #[source]
    pub error: SyncError,
    /// First block of the failed window.
    pub next_from: u64,
    pub batches: Vec<LogBatch>,
}

/// Replays historical logs from genesis up to a target block, one paced window at a time
pub struct HistoricalSyncer<S> {
    /// Current window
    cursor: BackfillCursor,
    /// Last block that must be covered
    target_block: u64,

    source: S,
    filter: LogFilter,
    rate_limiter: RateLimiter,
    cancel: CancellationToken,

    /// Accumulated results
    batches: Vec<LogBatch>,
    windows_queried: u64,
    max_block_number: Option<u64>,
    metrics: SharedMetrics,
}

impl<S: RangeLogFetcher> HistoricalSyncer<S> {
    pub fn new(
        source: S,
        filter: LogFilter,
        config: PhaseConfig,
        target_block: u64,
        cancel: CancellationToken,
        metrics: SharedMetrics,
    ) -> Self {
        info!(
            "Initializing historical syncer: target_block={}, blocks_per_query={}, interval={:?}",
            target_block, config.blocks_per_query, config.interval
        );

        Self {
            cursor: BackfillCursor::new(config.blocks_per_query),
            target_block,
            source,
            filter,
            rate_limiter: RateLimiter::new(config.interval),
            cancel,
            batches: Vec::new(),
            windows_queried: 0,
            max_block_number: None,
            metrics,
        }
    }

    /// Queries every window up to the target. Stops early on cancellation, fails on the first
    /// window whose fetch could not be completed.
    pub async fn sync(mut self) -> Result<BackfillOutcome, BackfillError> {
        info!("Starting historical log synchronization");

        while !self.cursor.is_past(self.target_block) {
            if self.cancel.is_cancelled() {
                return Ok(self.interrupted());
            }

            let window = self.cursor.window();
            self.metrics.set_next_from_block(window.from_block);

            let rate_limiter = self.rate_limiter;
            let paced = rate_limiter
                .run(&self.cancel, || self.source.fetch_range(&self.filter, window))
                .await;
            let logs = match paced.output {
                Ok(logs) => logs,
                Err(SyncError::Cancelled) => return Ok(self.interrupted()),
                Err(err) => {
                    error!(%window, "Backfill window failed: {}", err);
                    return Err(self.failed(err));
                }
            };

            info!(
                from_block = window.from_block,
                to_block = window.to_block,
                logs = logs.len(),
                elapsed_ms = paced.elapsed.as_millis(),
                "Fetched historical window"
            );
            self.record(window, logs);
            self.cursor.advance();

            if paced.pace == Pace::Cancelled {
                return Ok(self.interrupted());
            }
        }

        info!(
            "Historical synchronization completed. Windows: {}, logs: {}, max block: {:?}, target: {}",
            self.windows_queried,
            self.batches.iter().map(|b| b.logs.len()).sum::<usize>(),
            self.max_block_number,
            self.target_block
        );
        Ok(self.finish(BackfillStatus::Completed))
    }

    fn record(&mut self, window: BlockRange, logs: Vec<LogEntry>) {
        self.windows_queried += 1;
        self.metrics.record_window(logs.len());
        if logs.is_empty() {
            debug!(%window, "No logs in window");
            return;
        }
        let batch = LogBatch {
            range: window,
            logs,
        };
        self.max_block_number = self.max_block_number.max(batch.max_block_number());
        self.batches.push(batch);
    }

    fn interrupted(self) -> BackfillOutcome {
        let next_from = self.cursor.from_block();
        info!(next_from, "Cancellation requested, stopping historical sync");
        self.finish(BackfillStatus::Interrupted { next_from })
    }

    fn failed(self, error: SyncError) -> BackfillError {
        BackfillError {
            error,
            next_from: self.cursor.from_block(),
            batches: self.batches,
        }
    }

    fn finish(self, status: BackfillStatus) -> BackfillOutcome {
        BackfillOutcome {
            status,
            target_block: self.target_block,
            batches: self.batches,
            windows_queried: self.windows_queried,
            max_block_number: self.max_block_number,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::create_shared_metrics;
    use crate::test_utils::{FakeChain, test_filter};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    fn phase(blocks_per_query: u64, interval_ms: u64) -> PhaseConfig {
        PhaseConfig {
            blocks_per_query,
            interval: Duration::from_millis(interval_ms),
        }
    }

    #[test]
    fn test_windows_are_not_clamped_to_target() {
        assert_eq!(
            backfill_windows(250, 100),
            vec![
                BlockRange::new(0, 100),
                BlockRange::new(101, 201),
                BlockRange::new(202, 302),
            ]
        );
    }

    #[test]
    fn test_zero_target_still_queries_first_window() {
        assert_eq!(backfill_windows(0, 1000), vec![BlockRange::new(0, 1000)]);
    }

    #[test]
    fn test_windows_cover_target_contiguously() {
        for target in [0u64, 1, 5, 99, 100, 101, 250, 1000, 4321] {
            for width in [1u64, 2, 7, 100, 1000] {
                let windows = backfill_windows(target, width);
                assert_eq!(windows[0].from_block, 0);
                for pair in windows.windows(2) {
                    assert_eq!(pair[1].from_block, pair[0].to_block + 1);
                }
                for window in &windows {
                    assert_eq!(window.to_block - window.from_block, width);
                }
                let last = windows.last().unwrap();
                assert!(last.contains(target));
                assert_eq!(
                    windows.len() as u64,
                    (target + 1).div_ceil(width + 1),
                    "target={target}, width={width}"
                );
            }
        }
    }

    #[test]
    fn test_incremental_start_block() {
        assert_eq!(incremental_start_block(None, 0), 1);
        assert_eq!(incremental_start_block(None, 249), 250);
        assert_eq!(incremental_start_block(Some(120), 249), 250);
        assert_eq!(incremental_start_block(Some(260), 249), 261);
        assert_eq!(incremental_start_block(Some(249), 249), 250);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_accumulates_logs_in_order() {
        let chain = Arc::new(FakeChain::new(300).with_logs_at(&[5, 150, 151, 240, 290]));
        let metrics = create_shared_metrics();
        let syncer = HistoricalSyncer::new(
            chain.clone(),
            test_filter(),
            phase(100, 50),
            250,
            CancellationToken::new(),
            metrics.clone(),
        );

        let started = Instant::now();
        let outcome = syncer.sync().await.unwrap();

        assert_eq!(outcome.status, BackfillStatus::Completed);
        assert_eq!(outcome.windows_queried, 3);
        assert_eq!(chain.fetches(), backfill_windows(250, 100));
        assert_eq!(
            outcome.logs().map(|log| log.block_number).collect::<Vec<_>>(),
            vec![5, 150, 151, 240, 290]
        );
        assert_eq!(outcome.log_count(), 5);
        assert_eq!(outcome.batches.len(), 3);
        assert_eq!(outcome.max_block_number, Some(290));
        assert_eq!(outcome.incremental_start(), 291);
        assert_eq!(metrics.get_windows_queried(), 3);
        // each window paced to the interval
        assert_eq!(started.elapsed(), Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_windows_produce_no_batches() {
        let chain = Arc::new(FakeChain::new(300).with_logs_at(&[150]));
        let outcome = HistoricalSyncer::new(
            chain,
            test_filter(),
            phase(100, 1),
            250,
            CancellationToken::new(),
            create_shared_metrics(),
        )
        .sync()
        .await
        .unwrap();

        assert_eq!(outcome.windows_queried, 3);
        assert_eq!(outcome.batches.len(), 1);
        assert_eq!(outcome.batches[0].range, BlockRange::new(101, 201));
        assert_eq!(outcome.incremental_start(), 251);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_window_aborts_backfill() {
        let chain = Arc::new(FakeChain::new(300));
        chain.fail_next_fetch(SyncError::RetriesExhausted {
            attempts: 4,
            last: Box::new(SyncError::Query("busy".into())),
        });
        let result = HistoricalSyncer::new(
            chain.clone(),
            test_filter(),
            phase(100, 1),
            250,
            CancellationToken::new(),
            create_shared_metrics(),
        )
        .sync()
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err.error, SyncError::RetriesExhausted { .. }));
        assert_eq!(err.next_from, 0);
        assert!(err.batches.is_empty());
        assert_eq!(chain.fetches(), vec![BlockRange::new(0, 100)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_batches_of_completed_windows() {
        let chain = Arc::new(FakeChain::new(300).with_logs_at(&[5, 150, 220]));
        chain.fail_window_at(202);
        let err = HistoricalSyncer::new(
            chain,
            test_filter(),
            phase(100, 1),
            250,
            CancellationToken::new(),
            create_shared_metrics(),
        )
        .sync()
        .await
        .unwrap_err();

        assert!(matches!(err.error, SyncError::Query(_)));
        assert_eq!(err.next_from, 202);
        assert_eq!(
            err.batches.iter().map(|batch| batch.range).collect::<Vec<_>>(),
            vec![BlockRange::new(0, 100), BlockRange::new(101, 201)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_fetch_interrupts_without_advancing() {
        let chain = Arc::new(FakeChain::new(300).with_logs_at(&[5]));
        chain.fail_next_fetch(SyncError::Cancelled);
        let outcome = HistoricalSyncer::new(
            chain,
            test_filter(),
            phase(100, 1),
            250,
            CancellationToken::new(),
            create_shared_metrics(),
        )
        .sync()
        .await
        .unwrap();

        assert_eq!(outcome.status, BackfillStatus::Interrupted { next_from: 0 });
        assert_eq!(outcome.windows_queried, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_between_windows() {
        let chain = Arc::new(FakeChain::new(10_000).with_logs_at(&[3]));
        let cancel = CancellationToken::new();
        let syncer = HistoricalSyncer::new(
            chain.clone(),
            test_filter(),
            phase(10, 100),
            5000,
            cancel.clone(),
            create_shared_metrics(),
        );

        let handle = tokio::spawn(syncer.sync());
        tokio::time::sleep(Duration::from_millis(250)).await;
        cancel.cancel();
        let outcome = handle.await.unwrap().unwrap();

        // windows started at 0ms, 100ms and 200ms
        assert_eq!(outcome.windows_queried, 3);
        assert_eq!(outcome.status, BackfillStatus::Interrupted { next_from: 33 });
        assert_eq!(outcome.log_count(), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_queries_nothing() {
        let chain = Arc::new(FakeChain::new(100));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = HistoricalSyncer::new(
            chain.clone(),
            test_filter(),
            phase(10, 1),
            50,
            cancel,
            create_shared_metrics(),
        )
        .sync()
        .await
        .unwrap();

        assert_eq!(outcome.status, BackfillStatus::Interrupted { next_from: 0 });
        assert!(chain.fetches().is_empty());
    }
}
