use std::path::PathBuf;

use alloy::primitives::Address;
use clap::Parser;
use semacaulk_indexer_lib::config::{
    DEFAULT_FINALITY, DEFAULT_INITIAL_BLOCKS_PER_QUERY, DEFAULT_INITIAL_QUERY_INTERVAL_MS,
    DEFAULT_INTERVAL_MS, DEFAULT_MAIN_BLOCKS_PER_QUERY, DEFAULT_MAX_RETRIES,
    DEFAULT_MAX_RETRY_BACKOFF_MS, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_RETRY_BACKOFF_MS,
    DEFAULT_RPC_URL, SyncSettings, parse_contract_address, parse_rpc_url,
};
use serde::Deserialize;
use serde_with::{DisplayFromStr, serde_as};
use tracing::level_filters::LevelFilter;
use url::Url;

/// Mirrors Semacaulk InsertIdentity events into a local store.
#[derive(Parser, Debug, Clone)]
#[command(version)]
pub struct Cli {
    /// JSON-RPC endpoint of the chain node
    #[arg(short = 'r', long = "rpc", env = "SEMACAULK_RPC_URL", default_value = DEFAULT_RPC_URL, value_parser = parse_rpc_url)]
    pub rpc: Url,

    /// Semacaulk contract address
    #[arg(short = 'c', long, env = "SEMACAULK_CONTRACT", value_parser = parse_contract_address)]
    pub contract: Address,

    /// Blocks behind the tip treated as final
    #[arg(short = 'f', long, env = "SEMACAULK_FINALITY", default_value_t = DEFAULT_FINALITY)]
    pub finality: u64,

    /// Incremental polling interval (ms)
    #[arg(short = 'i', long, value_name = "MS", env = "SEMACAULK_INTERVAL", default_value_t = DEFAULT_INTERVAL_MS)]
    pub interval: u64,

    /// Window width of the incremental phase
    #[arg(short = 'm', long, env = "SEMACAULK_MAIN_BLOCKS_PER_QUERY", default_value_t = DEFAULT_MAIN_BLOCKS_PER_QUERY)]
    pub main_blocks_per_query: u64,

    /// Window width of the backfill phase
    #[arg(short = 'n', long, env = "SEMACAULK_INITIAL_BLOCKS_PER_QUERY", default_value_t = DEFAULT_INITIAL_BLOCKS_PER_QUERY)]
    pub initial_blocks_per_query: u64,

    /// Minimum spacing between backfill queries (ms)
    #[arg(short = 'q', long, value_name = "MS", env = "SEMACAULK_INITIAL_QUERY_INTERVAL", default_value_t = DEFAULT_INITIAL_QUERY_INTERVAL_MS)]
    pub initial_query_interval: u64,

    /// Upper bound on a single RPC call (ms)
    #[arg(long, value_name = "MS", env = "SEMACAULK_REQUEST_TIMEOUT", default_value_t = DEFAULT_REQUEST_TIMEOUT_MS)]
    pub request_timeout: u64,

    /// Retries after the first failed attempt of a call
    #[arg(long, env = "SEMACAULK_MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    /// First retry delay, doubled on every further retry (ms)
    #[arg(long, value_name = "MS", env = "SEMACAULK_RETRY_BACKOFF", default_value_t = DEFAULT_RETRY_BACKOFF_MS)]
    pub retry_backoff: u64,

    /// Cap on the retry delay (ms)
    #[arg(long, value_name = "MS", env = "SEMACAULK_MAX_RETRY_BACKOFF", default_value_t = DEFAULT_MAX_RETRY_BACKOFF_MS)]
    pub max_retry_backoff: u64,

    /// ABI file (bare array or build artifact) declaring InsertIdentity
    #[arg(long, env = "SEMACAULK_ABI")]
    pub abi: Option<PathBuf>,
}

impl Cli {
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            finality: self.finality,
            interval_ms: self.interval,
            main_blocks_per_query: self.main_blocks_per_query,
            initial_blocks_per_query: self.initial_blocks_per_query,
            initial_query_interval_ms: self.initial_query_interval,
            request_timeout_ms: self.request_timeout,
            max_retries: self.max_retries,
            retry_backoff_ms: self.retry_backoff,
            max_retry_backoff_ms: self.max_retry_backoff,
        }
    }
}

#[serde_as]
#[derive(Deserialize, Debug, Clone)]
pub struct EnvConfig {
    #[serde_as(as = "DisplayFromStr")]
    #[serde(default = "default_rust_log")]
    pub rust_log: LevelFilter,
    #[serde(default = "default_semacaulk_indexer_db_root")]
    pub semacaulk_indexer_db_root: PathBuf,
}

fn default_rust_log() -> LevelFilter {
    LevelFilter::INFO
}

fn default_semacaulk_indexer_db_root() -> PathBuf {
    std::env::home_dir()
        .unwrap_or_default()
        .join(".semacaulk-indexer")
}

pub fn get_env_config() -> anyhow::Result<EnvConfig> {
    Ok(envy::from_env::<EnvConfig>()?)
}
