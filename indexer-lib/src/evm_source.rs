use crate::block_range::BlockRange;
use crate::error::{ConfigError, SyncError};
use crate::log_source::{BlockHeightOracle, LogEntry, LogFilter, RangeLogFetcher};
use alloy::json_abi::JsonAbi;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::client::RpcClient;
use alloy::rpc::types::Filter;
use alloy::sol;
use alloy::sol_types::SolEvent;
use alloy::transports::layers::RetryBackoffLayer;
use alloy::transports::{RpcError, TransportErrorKind};
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info};
use url::Url;

sol! {
    #[sol(rpc)]
    contract Semacaulk {
        event InsertIdentity(uint256 _index, uint256 _identityCommitment);

        function getCurrentIndex() external view returns (uint256);
    }
}

pub const INSERT_IDENTITY_EVENT: &str = "InsertIdentity";

/// Selector of the built-in `InsertIdentity(uint256,uint256)` declaration.
pub fn builtin_event_signature() -> B256 {
    Semacaulk::InsertIdentity::SIGNATURE_HASH
}

/// Reads either a bare JSON ABI array or a build artifact carrying an `abi` field.
pub fn load_abi(path: &Path) -> Result<JsonAbi, ConfigError> {
    let abi_error = |reason: String| ConfigError::Abi {
        path: path.to_path_buf(),
        reason,
    };
    let raw = std::fs::read_to_string(path).map_err(|err| abi_error(err.to_string()))?;
    let mut document: serde_json::Value =
        serde_json::from_str(&raw).map_err(|err| abi_error(err.to_string()))?;
    let abi = match document.get_mut("abi") {
        Some(abi) => abi.take(),
        None => document,
    };
    serde_json::from_value(abi).map_err(|err| abi_error(err.to_string()))
}

pub fn event_signature_from_abi(abi: &JsonAbi) -> Result<B256, ConfigError> {
    abi.event(INSERT_IDENTITY_EVENT)
        .and_then(|events| events.first())
        .map(|event| event.selector())
        .ok_or(ConfigError::MissingEvent(INSERT_IDENTITY_EVENT))
}

/// Topic0 to filter on: from the ABI file when one is given, the built-in declaration otherwise.
pub fn resolve_event_signature(abi_path: Option<&Path>) -> Result<B256, ConfigError> {
    match abi_path {
        Some(path) => {
            let signature = event_signature_from_abi(&load_abi(path)?)?;
            info!(path = %path.display(), %signature, "Using InsertIdentity selector from ABI file");
            Ok(signature)
        }
        None => Ok(builtin_event_signature()),
    }
}

fn classify(err: RpcError<TransportErrorKind>) -> SyncError {
    match err {
        RpcError::Transport(kind) => SyncError::Connectivity(kind.to_string()),
        other => SyncError::Query(other.to_string()),
    }
}

/// Oracle and fetcher backed by a JSON-RPC node over HTTP
#[derive(Clone)]
pub struct EvmLogSource {
    provider: RootProvider,
    contract: Address,
}

impl EvmLogSource {
    pub fn new(rpc_url: Url, contract: Address) -> Self {
        let retry_layer = RetryBackoffLayer::new(5, 1000, 100);
        let client = RpcClient::builder().layer(retry_layer).http(rpc_url);
        Self {
            provider: RootProvider::new(client),
            contract,
        }
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn filter(&self, event_signature: B256) -> LogFilter {
        LogFilter {
            address: self.contract,
            event_signature,
        }
    }

    /// Calls `getCurrentIndex()` to prove the node is reachable and the contract is deployed.
    pub async fn sanity_check(&self) -> Result<U256, SyncError> {
        let semacaulk = Semacaulk::new(self.contract, self.provider.clone());
        let current_index = semacaulk
            .getCurrentIndex()
            .call()
            .await
            .map_err(|err| {
                SyncError::Connectivity(format!(
                    "getCurrentIndex() on {} failed: {err}",
                    self.contract
                ))
            })?
            ._0;
        Ok(current_index)
    }
}

#[async_trait]
impl BlockHeightOracle for EvmLogSource {
    async fn latest_block(&self) -> Result<u64, SyncError> {
        self.provider.get_block_number().await.map_err(classify)
    }
}

#[async_trait]
impl RangeLogFetcher for EvmLogSource {
    async fn fetch_range(
        &self,
        filter: &LogFilter,
        range: BlockRange,
    ) -> Result<Vec<LogEntry>, SyncError> {
        if range.is_empty() {
            return Err(SyncError::InvalidRange(range));
        }
        let query = Filter::new()
            .address(filter.address)
            .event_signature(filter.event_signature)
            .from_block(range.from_block)
            .to_block(range.to_block);
        let logs = self.provider.get_logs(&query).await.map_err(classify)?;
        debug!(%range, count = logs.len(), "eth_getLogs returned");
        logs.into_iter().map(LogEntry::try_from).collect()
    }
}
