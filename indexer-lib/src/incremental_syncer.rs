use crate::block_range::BlockRange;
use crate::config::PhaseConfig;
use crate::error::SyncError;
use crate::handler::{BatchHandler, LogBatch};
use crate::log_source::{LogEntry, LogFilter, LogSource};
use crate::metrics::SharedMetrics;
use crate::rate_limiter::{Pace, RateLimiter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// What the next incremental iteration should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// No new final block beyond the cursor yet.
    Idle,
    /// Query this range, already clamped to the final block.
    Fetch(BlockRange),
}

/// Sliding window of the incremental phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncrementalCursor {
    from_block: u64,
    to_block: u64,
    blocks_per_query: u64,
    last_final_block: Option<u64>,
}

impl IncrementalCursor {
    pub fn new(start_block: u64, blocks_per_query: u64) -> Self {
        Self {
            from_block: start_block,
            to_block: start_block.saturating_add(blocks_per_query),
            blocks_per_query,
            last_final_block: None,
        }
    }

    pub fn from_block(&self) -> u64 {
        self.from_block
    }

    pub fn to_block(&self) -> u64 {
        self.to_block
    }

    pub fn last_final_block(&self) -> Option<u64> {
        self.last_final_block
    }

    /// Decides the query for the given final block without touching the window.
    pub fn plan(&mut self, current_final_block: u64) -> Step {
        self.last_final_block = Some(current_final_block);
        if self.from_block > current_final_block {
            return Step::Idle;
        }
        Step::Fetch(BlockRange::new(self.from_block, self.to_block).clamp_to(current_final_block))
    }

    /// Moves the stored window by its nominal width, whatever clamp the last query used.
    /// The clamp is not written back: after `[100, 200]` was clamped to `[100, 150]` the
    /// next window is `[200, 300]`, not `[200, 250]`.
    pub fn advance(&mut self) {
        self.from_block = self.from_block.saturating_add(self.blocks_per_query);
        self.to_block = self.to_block.saturating_add(self.blocks_per_query);
    }
}

/// Result of a single successful iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    Idle { final_block: u64 },
    /// `logs` counts the delivered logs, already-delivered ones excluded.
    Fetched { range: BlockRange, logs: usize },
}

fn log_position(log: &LogEntry) -> (u64, u64) {
    (log.block_number, log.log_index)
}

/// Follows the chain from a starting block, one paced window per iteration, until cancelled
pub struct IncrementalSyncer<S, H> {
    cursor: IncrementalCursor,
    finality: u64,
    /// Position of the newest log handed to the handler.
    last_delivered: Option<(u64, u64)>,

    source: S,
    filter: LogFilter,
    handler: H,
    rate_limiter: RateLimiter,
    cancel: CancellationToken,

    metrics: SharedMetrics,
}

impl<S: LogSource, H: BatchHandler> IncrementalSyncer<S, H> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: S,
        handler: H,
        filter: LogFilter,
        config: PhaseConfig,
        finality: u64,
        start_block: u64,
        cancel: CancellationToken,
        metrics: SharedMetrics,
    ) -> Self {
        info!(
            "Initializing incremental syncer: start_block={}, blocks_per_query={}, interval={:?}, finality={}",
            start_block, config.blocks_per_query, config.interval, finality
        );
        metrics.set_next_from_block(start_block);

        Self {
            cursor: IncrementalCursor::new(start_block, config.blocks_per_query),
            finality,
            last_delivered: None,
            source,
            filter,
            handler,
            rate_limiter: RateLimiter::new(config.interval),
            cancel,
            metrics,
        }
    }

    pub fn cursor(&self) -> &IncrementalCursor {
        &self.cursor
    }

    /// Runs until cancelled. Source failures are logged and the same window is tried again on the
    /// next iteration; a failing handler ends the loop.
    pub async fn run(mut self) -> Result<(), SyncError> {
        info!("Starting incremental log synchronization");

        loop {
            if self.cancel.is_cancelled() {
                info!("Cancellation requested, stopping incremental sync");
                return Ok(());
            }

            let rate_limiter = self.rate_limiter;
            let cancel = self.cancel.clone();
            let paced = rate_limiter.run(&cancel, || self.iterate()).await;

            match paced.output {
                Ok(Iteration::Idle { final_block }) => {
                    trace!(final_block, from_block = self.cursor.from_block(), "No new final blocks");
                }
                Ok(Iteration::Fetched { range, logs }) => {
                    debug!(%range, blocks = range.len(), logs, elapsed_ms = paced.elapsed.as_millis(), "Fetched window");
                }
                Err(SyncError::Cancelled) => {
                    info!("Cancellation requested, stopping incremental sync");
                    return Ok(());
                }
                Err(err) if err.is_recoverable() => {
                    self.metrics.increment_failed_iterations();
                    warn!(
                        from_block = self.cursor.from_block(),
                        "Incremental iteration failed, will retry the same window: {}", err
                    );
                }
                Err(err) => {
                    error!("Incremental sync stopped: {}", err);
                    return Err(err);
                }
            }

            if paced.pace == Pace::Cancelled {
                info!("Cancellation requested, stopping incremental sync");
                return Ok(());
            }
        }
    }

    /// One iteration without pacing: refresh the final block, query at most one window, hand a
    /// non-empty result to the handler and advance.
    pub async fn iterate(&mut self) -> Result<Iteration, SyncError> {
        let final_block = self.source.current_final_block(self.finality).await?;
        self.metrics.set_latest_final_block(final_block);

        let range = match self.cursor.plan(final_block) {
            Step::Idle => {
                self.metrics.increment_idle_iterations();
                return Ok(Iteration::Idle { final_block });
            }
            Step::Fetch(range) => range,
        };

        let fetched = self.source.fetch_range(&self.filter, range).await?;
        self.metrics.record_window(fetched.len());

        // consecutive windows share their boundary block
        let last_delivered = self.last_delivered;
        let logs: Vec<LogEntry> = fetched
            .into_iter()
            .filter(|log| Some(log_position(log)) > last_delivered)
            .collect();
        let count = logs.len();
        if let Some(newest) = logs.iter().map(log_position).max() {
            info!(%range, logs = count, "New identity logs");
            self.handler
                .handle(LogBatch { range, logs })
                .await
                .map_err(SyncError::Handler)?;
            self.last_delivered = Some(newest);
            self.metrics.increment_batches_delivered();
        }

        self.cursor.advance();
        self.metrics.set_next_from_block(self.cursor.from_block());
        Ok(Iteration::Fetched {
            range,
            logs: count,
        })
    }
}
