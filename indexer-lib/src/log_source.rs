use crate::block_range::BlockRange;
use crate::error::SyncError;
use alloy::primitives::{Address, B256, Bytes};
use alloy::rpc::types::Log;
use async_trait::async_trait;
use std::sync::Arc;

/// Contract address plus topic0 the fetcher filters on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub event_signature: B256,
}

/// A mined event log as returned by the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_hash: B256,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

impl TryFrom<Log> for LogEntry {
    type Error = SyncError;

    fn try_from(log: Log) -> Result<Self, Self::Error> {
        let block_number = log
            .block_number
            .ok_or(SyncError::MalformedLog("missing block number"))?;
        let log_index = log
            .log_index
            .ok_or(SyncError::MalformedLog("missing log index"))?;
        let transaction_hash = log
            .transaction_hash
            .ok_or(SyncError::MalformedLog("missing transaction hash"))?;
        let (topics, data) = log.inner.data.split();
        Ok(Self {
            block_number,
            log_index,
            transaction_hash,
            topics,
            data,
        })
    }
}

#[async_trait]
pub trait BlockHeightOracle: Send + Sync {
    /// Current chain tip as reported by the node.
    async fn latest_block(&self) -> Result<u64, SyncError>;

    /// Tip minus `finality`, never below zero.
    async fn current_final_block(&self, finality: u64) -> Result<u64, SyncError> {
        let tip = self.latest_block().await?;
        Ok(tip.saturating_sub(finality))
    }
}

#[async_trait]
pub trait RangeLogFetcher: Send + Sync {
    /// Issues exactly one query for `range`; an empty vec means no matching logs.
    async fn fetch_range(
        &self,
        filter: &LogFilter,
        range: BlockRange,
    ) -> Result<Vec<LogEntry>, SyncError>;
}

/// Both capabilities the synchronizers need.
pub trait LogSource: BlockHeightOracle + RangeLogFetcher {}

impl<T: BlockHeightOracle + RangeLogFetcher + ?Sized> LogSource for T {}

#[async_trait]
impl<T: BlockHeightOracle + ?Sized> BlockHeightOracle for Arc<T> {
    async fn latest_block(&self) -> Result<u64, SyncError> {
        (**self).latest_block().await
    }
}

#[async_trait]
impl<T: RangeLogFetcher + ?Sized> RangeLogFetcher for Arc<T> {
    async fn fetch_range(
        &self,
        filter: &LogFilter,
        range: BlockRange,
    ) -> Result<Vec<LogEntry>, SyncError> {
        (**self).fetch_range(filter, range).await
    }
}
