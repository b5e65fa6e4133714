use crate::block_range::BlockRange;
use crate::error::SyncError;
use crate::log_source::{BlockHeightOracle, LogEntry, LogFilter, RangeLogFetcher};
use alloy::primitives::{Address, B256, Bytes};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) fn test_filter() -> LogFilter {
    LogFilter {
        address: Address::repeat_byte(0x42),
        event_signature: B256::repeat_byte(0xee),
    }
}

pub(crate) fn log_at(block_number: u64, log_index: u64) -> LogEntry {
    LogEntry {
        block_number,
        log_index,
        transaction_hash: B256::left_padding_from(&block_number.to_be_bytes()),
        topics: vec![
            B256::repeat_byte(0xee),
            B256::left_padding_from(&log_index.to_be_bytes()),
        ],
        data: Bytes::from(block_number.to_be_bytes().to_vec()),
    }
}

/// In-memory chain with a movable tip and scripted failures.
pub(crate) struct FakeChain {
    tip: AtomicU64,
    logs: Vec<LogEntry>,
    fetches: Mutex<Vec<BlockRange>>,
    fetch_failures: Mutex<VecDeque<SyncError>>,
    height_failures: Mutex<VecDeque<SyncError>>,
    failing_windows: Mutex<Vec<u64>>,
    height_calls: AtomicU64,
}

impl FakeChain {
    pub(crate) fn new(tip: u64) -> Self {
        Self {
            tip: AtomicU64::new(tip),
            logs: Vec::new(),
            fetches: Mutex::new(Vec::new()),
            fetch_failures: Mutex::new(VecDeque::new()),
            height_failures: Mutex::new(VecDeque::new()),
            failing_windows: Mutex::new(Vec::new()),
            height_calls: AtomicU64::new(0),
        }
    }

    /// One log per listed block, log index 0.
    pub(crate) fn with_logs_at(mut self, blocks: &[u64]) -> Self {
        self.logs.extend(blocks.iter().map(|block| log_at(*block, 0)));
        self
    }

    pub(crate) fn set_tip(&self, tip: u64) {
        self.tip.store(tip, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_fetch(&self, err: SyncError) {
        self.fetch_failures.lock().push_back(err);
    }

    /// Every fetch of a window starting at `from_block` fails with a query error.
    pub(crate) fn fail_window_at(&self, from_block: u64) {
        self.failing_windows.lock().push(from_block);
    }

    pub(crate) fn fail_next_height(&self, err: SyncError) {
        self.height_failures.lock().push_back(err);
    }

    /// Every range a fetch was attempted for, failed attempts included.
    pub(crate) fn fetches(&self) -> Vec<BlockRange> {
        self.fetches.lock().clone()
    }

    pub(crate) fn height_calls(&self) -> u64 {
        self.height_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlockHeightOracle for FakeChain {
    async fn latest_block(&self) -> Result<u64, SyncError> {
        self.height_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.height_failures.lock().pop_front() {
            return Err(err);
        }
        Ok(self.tip.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl RangeLogFetcher for FakeChain {
    async fn fetch_range(
        &self,
        filter: &LogFilter,
        range: BlockRange,
    ) -> Result<Vec<LogEntry>, SyncError> {
        if !range.is_valid() {
            return Err(SyncError::InvalidRange(range));
        }
        self.fetches.lock().push(range);
        if let Some(err) = self.fetch_failures.lock().pop_front() {
            return Err(err);
        }
        if self.failing_windows.lock().contains(&range.from_block) {
            return Err(SyncError::Query(format!("window {range} unavailable")));
        }
        Ok(self
            .logs
            .iter()
            .filter(|log| range.contains(log.block_number))
            .filter(|log| log.topics.first() == Some(&filter.event_signature))
            .cloned()
            .collect())
    }
}
