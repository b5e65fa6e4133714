use crate::block_range::BlockRange;
use crate::log_source::LogEntry;
use async_trait::async_trait;
use tracing::error;

/// Logs found in one queried window, together with the window itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBatch {
    pub range: BlockRange,
    pub logs: Vec<LogEntry>,
}

impl LogBatch {
    pub fn max_block_number(&self) -> Option<u64> {
        self.logs.iter().map(|log| log.block_number).max()
    }
}

/// Downstream consumer of non-empty batches, called in ascending block order.
#[async_trait]
pub trait BatchHandler: Send {
    async fn handle(&mut self, batch: LogBatch) -> anyhow::Result<()>;
}

#[async_trait]
impl BatchHandler for flume::Sender<LogBatch> {
    async fn handle(&mut self, batch: LogBatch) -> anyhow::Result<()> {
        if let Err(e) = self.send_async(batch).await {
            error!("Failed to send log batch to handler: {}", e);
            return Err(anyhow::anyhow!("Log batch channel closed: {}", e));
        }
        Ok(())
    }
}

#[async_trait]
impl BatchHandler for Vec<LogBatch> {
    async fn handle(&mut self, batch: LogBatch) -> anyhow::Result<()> {
        self.push(batch);
        Ok(())
    }
}
