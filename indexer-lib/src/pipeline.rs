use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::handler::{BatchHandler, LogBatch};
use crate::historical_syncer::{BackfillStatus, HistoricalSyncer};
use crate::incremental_syncer::IncrementalSyncer;
use crate::log_source::{BlockHeightOracle, LogFilter, LogSource};
use crate::metrics::SharedMetrics;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Last block the backfill must cover for a given finality-adjusted tip.
pub fn backfill_target(final_tip: u64) -> u64 {
    final_tip.saturating_sub(1)
}

/// Backfill from genesis, then incremental polling, feeding one handler.
pub struct SyncPipeline<S, H> {
    source: Arc<S>,
    handler: H,
    filter: LogFilter,
    config: SyncConfig,
    cancel: CancellationToken,
    metrics: SharedMetrics,
}

impl<S: LogSource, H: BatchHandler> SyncPipeline<S, H> {
    pub fn new(
        source: S,
        handler: H,
        filter: LogFilter,
        config: SyncConfig,
        cancel: CancellationToken,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            source: Arc::new(source),
            handler,
            filter,
            config,
            cancel,
            metrics,
        }
    }

    /// Runs both phases. Returns `Ok` once cancelled, or the first fatal error.
    pub async fn run(self) -> Result<(), SyncError> {
        match self.run_phases().await {
            Err(SyncError::Cancelled) => {
                info!("Sync cancelled");
                Ok(())
            }
            result => result,
        }
    }

    async fn run_phases(mut self) -> Result<(), SyncError> {
        let final_tip = self
            .source
            .current_final_block(self.config.finality)
            .await?;
        self.metrics.set_latest_final_block(final_tip);
        let target = backfill_target(final_tip);
        info!(final_tip, target, finality = self.config.finality, "Computed backfill target");

        let outcome = match HistoricalSyncer::new(
            self.source.clone(),
            self.filter,
            self.config.backfill,
            target,
            self.cancel.clone(),
            self.metrics.clone(),
        )
        .sync()
        .await
        {
            Ok(outcome) => outcome,
            Err(failed) => {
                warn!(
                    next_from = failed.next_from,
                    batches = failed.batches.len(),
                    "Backfill failed, delivering the logs fetched so far"
                );
                self.deliver(failed.batches).await?;
                return Err(failed.error);
            }
        };

        let start_block = outcome.incremental_start();
        let status = outcome.status;
        info!(
            windows = outcome.windows_queried,
            logs = outcome.log_count(),
            batches = outcome.batches.len(),
            "Delivering historical logs"
        );
        self.deliver(outcome.batches).await?;

        if let BackfillStatus::Interrupted { next_from } = status {
            info!(next_from, "Backfill interrupted, not starting incremental sync");
            return Ok(());
        }

        info!(start_block, "Handing off to incremental sync");
        IncrementalSyncer::new(
            self.source,
            self.handler,
            self.filter,
            self.config.incremental,
            self.config.finality,
            start_block,
            self.cancel,
            self.metrics,
        )
        .run()
        .await
    }

    async fn deliver(&mut self, batches: Vec<LogBatch>) -> Result<(), SyncError> {
        for batch in batches {
            self.handler
                .handle(batch)
                .await
                .map_err(SyncError::Handler)?;
            self.metrics.increment_batches_delivered();
        }
        Ok(())
    }
}
