use crate::block_range::BlockRange;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while talking to the node or delivering batches.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("connectivity error: {0}")]
    Connectivity(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("giving up after {attempts} attempts, last error: {last}")]
    RetriesExhausted { attempts: u32, last: Box<SyncError> },
    #[error("invalid block range {0}: from block is greater than to block")]
    InvalidRange(BlockRange),
    #[error("malformed log: {0}")]
    MalformedLog(&'static str),
    #[error("batch handler failed: {0:#}")]
    Handler(anyhow::Error),
    #[error("cancelled")]
    Cancelled,
}

impl SyncError {
    /// Transient errors are worth another attempt of the same request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::Connectivity(_) | SyncError::Query(_) | SyncError::Timeout(_)
        )
    }

    /// Recoverable errors let a polling loop carry on with its next iteration.
    pub fn is_recoverable(&self) -> bool {
        self.is_transient() || matches!(self, SyncError::RetriesExhausted { .. })
    }
}

/// Errors raised while validating user supplied settings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {flag}: {reason}")]
    InvalidValue { flag: &'static str, reason: String },
    #[error(
        "invalid value for -c/--contract; should be a valid Ethereum contract address, got {0:?}"
    )]
    InvalidContractAddress(String),
    #[error("invalid value for -r/--rpc; {url:?} is not a valid URL: {reason}")]
    InvalidRpcUrl { url: String, reason: String },
    #[error("failed to load ABI from {path}: {reason}")]
    Abi { path: PathBuf, reason: String },
    #[error("event {0} is not declared in the ABI")]
    MissingEvent(&'static str),
}
