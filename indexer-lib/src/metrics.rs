use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A snapshot of the sync metrics.
/// This structure contains a copy of all metric counters as simple u64 values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncMetricsSnapshot {
    /// Number of block windows queried, both phases
    pub windows_queried: u64,
    /// Number of logs returned by the node
    pub logs_fetched: u64,
    /// Number of non-empty batches handed downstream
    pub batches_delivered: u64,
    /// Number of logs written to the store
    pub logs_stored: u64,
    /// Incremental iterations that found no new final block
    pub idle_iterations: u64,
    /// Incremental iterations that failed with a recoverable error
    pub failed_iterations: u64,
    /// Latest finality-adjusted tip observed
    pub latest_final_block: u64,
    /// Start of the next window to be queried
    pub next_from_block: u64,
}

impl Display for SyncMetricsSnapshot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Sync Metrics Snapshot:")?;
        writeln!(f, "  Windows queried: {}", self.windows_queried)?;
        writeln!(f, "  Logs fetched: {}", self.logs_fetched)?;
        writeln!(f, "  Batches delivered: {}", self.batches_delivered)?;
        writeln!(f, "  Logs stored: {}", self.logs_stored)?;
        writeln!(f, "  Idle iterations: {}", self.idle_iterations)?;
        writeln!(f, "  Failed iterations: {}", self.failed_iterations)?;
        writeln!(f, "  Latest final block: {}", self.latest_final_block)?;
        writeln!(f, "  Next from block: {}", self.next_from_block)
    }
}

/// Metrics structure containing atomic counters shared by the syncers and the store worker
#[derive(Debug, Default)]
pub struct SyncMetrics {
    windows_queried: AtomicU64,
    logs_fetched: AtomicU64,
    batches_delivered: AtomicU64,
    logs_stored: AtomicU64,
    idle_iterations: AtomicU64,
    failed_iterations: AtomicU64,
    latest_final_block: AtomicU64,
    next_from_block: AtomicU64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a snapshot of the current metrics
    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            windows_queried: self.windows_queried.load(Ordering::Relaxed),
            logs_fetched: self.logs_fetched.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            logs_stored: self.logs_stored.load(Ordering::Relaxed),
            idle_iterations: self.idle_iterations.load(Ordering::Relaxed),
            failed_iterations: self.failed_iterations.load(Ordering::Relaxed),
            latest_final_block: self.latest_final_block.load(Ordering::Relaxed),
            next_from_block: self.next_from_block.load(Ordering::Relaxed),
        }
    }

    /// Count one queried window and the logs it returned
    pub fn record_window(&self, logs: usize) {
        self.windows_queried.fetch_add(1, Ordering::Relaxed);
        self.logs_fetched.fetch_add(logs as u64, Ordering::Relaxed);
    }

    pub fn increment_batches_delivered(&self) {
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_logs_stored(&self, count: u64) {
        self.logs_stored.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_idle_iterations(&self) {
        self.idle_iterations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failed_iterations(&self) {
        self.failed_iterations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_latest_final_block(&self, block: u64) {
        self.latest_final_block.store(block, Ordering::Relaxed);
    }

    pub fn set_next_from_block(&self, block: u64) {
        self.next_from_block.store(block, Ordering::Relaxed);
    }

    pub fn get_windows_queried(&self) -> u64 {
        self.windows_queried.load(Ordering::Relaxed)
    }

    pub fn get_batches_delivered(&self) -> u64 {
        self.batches_delivered.load(Ordering::Relaxed)
    }
}

/// Shared metrics instance wrapped in Arc for use across the sync task and the store worker
pub type SharedMetrics = Arc<SyncMetrics>;

pub fn create_shared_metrics() -> SharedMetrics {
    Arc::new(SyncMetrics::new())
}
