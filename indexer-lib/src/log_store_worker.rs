use crate::database::identity_logs::IdentityLogPartition;
use crate::database::metadata::MetadataPartition;
use crate::fifo_set::FifoSet;
use crate::handler::LogBatch;
use crate::metrics::SharedMetrics;
use fjall::TxKeyspace;
use tracing::{debug, info, trace};

/// Persists delivered batches. Runs on its own OS thread, fed through a bounded channel.
#[derive(bon::Builder)]
pub struct LogStoreWorker {
    processed_logs: FifoSet<(u64, u64)>,
    intake: flume::Receiver<LogBatch>,
    shutdown: flume::Receiver<()>,

    tx_keyspace: TxKeyspace,

    metadata_partition: MetadataPartition,
    identity_log_partition: IdentityLogPartition,
    metrics: SharedMetrics,
}

enum BatchOrShutdown {
    Batch(LogBatch),
    /// Every sender is gone, nothing more will arrive.
    IntakeClosed,
    Shutdown,
}

impl LogStoreWorker {
    pub fn process(&mut self) -> anyhow::Result<()> {
        info!("Log store worker started");
        loop {
            match self.select_input() {
                BatchOrShutdown::Shutdown => {
                    info!("Log store worker received shutdown signal, draining batches first");
                    let pending: Vec<LogBatch> = self.intake.drain().collect();
                    for batch in &pending {
                        self.handle_batch(batch)?;
                    }
                    info!(drained = pending.len(), "Draining is done, stopping log store worker");
                    return Ok(());
                }
                BatchOrShutdown::IntakeClosed => {
                    info!("Log batch intake closed, stopping log store worker");
                    return Ok(());
                }
                BatchOrShutdown::Batch(batch) => {
                    self.handle_batch(&batch)?;
                }
            }
        }
    }

    fn select_input(&self) -> BatchOrShutdown {
        trace!("Waiting for new log batches or shutdown signal");
        flume::Selector::new()
            .recv(&self.intake, |r| {
                r.map_or(BatchOrShutdown::IntakeClosed, BatchOrShutdown::Batch)
            })
            .recv(&self.shutdown, |_| BatchOrShutdown::Shutdown)
            .wait()
    }

    fn handle_batch(&mut self, batch: &LogBatch) -> anyhow::Result<()> {
        debug!(range = %batch.range, "Received {} logs for storing", batch.logs.len());
        let mut wtx = self.tx_keyspace.write_tx()?;

        let mut stored = Vec::with_capacity(batch.logs.len());
        for log in &batch.logs {
            let position = (log.block_number, log.log_index);
            if self.processed_logs.contains(&position) {
                debug!(
                    block_number = log.block_number,
                    log_index = log.log_index,
                    "Skipping already stored log"
                );
                continue;
            }
            trace!(block_number = log.block_number, tx_hash = %log.transaction_hash, "Storing identity log");
            self.identity_log_partition.insert_wtx(&mut wtx, log);
            stored.push(position);
        }

        self.metadata_partition
            .set_latest_delivered_block(&mut wtx, batch.range.to_block)?;
        wtx.commit()??;

        self.metrics.add_logs_stored(stored.len() as u64);
        for position in stored {
            self.processed_logs.insert(position);
        }
        Ok(())
    }
}
