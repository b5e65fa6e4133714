pub mod block_range;
pub mod config;
pub mod error;

pub mod evm_source;
pub mod log_source;
pub mod retry;

pub mod fifo_set;
pub mod rate_limiter;

pub mod historical_syncer;
pub mod incremental_syncer;
pub mod pipeline;

pub mod handler;

pub mod database;
pub mod log_store_worker;
pub mod metrics;

#[cfg(test)]
pub(crate) mod test_utils;
