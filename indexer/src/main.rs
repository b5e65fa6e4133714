use anyhow::{Context, anyhow};
use clap::Parser;
use dotenv::dotenv;
use fjall::Config;
use semacaulk_indexer_lib::{
    config::SyncConfig,
    database::{identity_logs::IdentityLogPartition, metadata::MetadataPartition},
    error::SyncError,
    evm_source::{EvmLogSource, resolve_event_signature},
    fifo_set::FifoSet,
    handler::LogBatch,
    log_store_worker::LogStoreWorker,
    metrics::create_shared_metrics,
    pipeline::SyncPipeline,
    retry::RetryingSource,
};
use time::UtcOffset;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{Cli, get_env_config};
use crate::logging::init_logging;

mod config;
mod logging;

fn main() -> anyhow::Result<()> {
    // only readable while the process is single threaded, so before the runtime starts
    let local_offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(local_offset))
}

async fn run(local_offset: UtcOffset) -> anyhow::Result<()> {
    // ignore failures as .env might not be present at runtime, and this use-case is tolerated
    dotenv()
        .inspect_err(|err| println!("[WARN] reading .env files is failed with err {err}"))
        .ok();

    let env_config = get_env_config()?;
    let cli = Cli::parse();

    let _log_guards = init_logging(
        &env_config.semacaulk_indexer_db_root.join("app_logs"),
        env_config.rust_log,
        local_offset,
    )?;

    let sync_config = SyncConfig::try_from(cli.sync_settings())?;
    let event_signature = resolve_event_signature(cli.abi.as_deref())?;
    info!(rpc = %cli.rpc, contract = %cli.contract, ?sync_config, "Starting semacaulk indexer");

    let source = EvmLogSource::new(cli.rpc.clone(), cli.contract);
    let current_index = tokio::time::timeout(
        sync_config.retry.request_timeout,
        source.sanity_check(),
    )
    .await
    .map_err(|_| SyncError::Timeout(sync_config.retry.request_timeout))?
    .context("contract sanity check failed")?;
    info!(%current_index, "Contract is reachable");

    // Database

    let db_path = env_config
        .semacaulk_indexer_db_root
        .join(cli.contract.to_string());
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("creating data directory {}", db_path.display()))?;
    let tx_keyspace = Config::new(&db_path).open_transactional()?;

    let metadata_partition = MetadataPartition::new(&tx_keyspace)?;
    let identity_log_partition = IdentityLogPartition::new(&tx_keyspace)?;
    metadata_partition.ensure_db_version()?;
    let rtx = tx_keyspace.read_tx();
    let newest_stored_block = identity_log_partition
        .iter_from_block_rtx(&rtx, 0)
        .next_back()
        .transpose()?
        .map(|log| log.block_number);
    info!(
        path = %db_path.display(),
        stored_logs = identity_log_partition.len()?,
        ?newest_stored_block,
        latest_delivered_block = ?metadata_partition.get_latest_delivered_block_rtx(&rtx)?,
        "Opened log store"
    );
    drop(rtx);

    let (log_intake_tx, log_intake_rx) = flume::bounded::<LogBatch>(255);
    let (shutdown_store_worker_tx, shutdown_store_worker_rx) = flume::bounded(1);

    let metrics = create_shared_metrics();

    let mut log_store_worker = LogStoreWorker::builder()
        .processed_logs(FifoSet::new(1024))
        .intake(log_intake_rx)
        .shutdown(shutdown_store_worker_rx)
        .tx_keyspace(tx_keyspace.clone())
        .metadata_partition(metadata_partition.clone())
        .identity_log_partition(identity_log_partition.clone())
        .metrics(metrics.clone())
        .build();
    let log_store_worker_handle = std::thread::spawn(move || log_store_worker.process());

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl-C, stopping sync");
                    cancel.cancel();
                }
                Err(err) => error!("Failed to listen for Ctrl-C: {err}"),
            }
        }
    });

    let filter = source.filter(event_signature);
    let sync_result = SyncPipeline::new(
        RetryingSource::new(source, sync_config.retry).with_cancellation(cancel.clone()),
        log_intake_tx,
        filter,
        sync_config,
        cancel,
        metrics.clone(),
    )
    .run()
    .await
    .inspect_err(|err| error!("Sync stopped with error: {err}"));

    _ = shutdown_store_worker_tx
        .send(())
        .inspect_err(|err| error!("failed to shutdown log store worker: {}", err));
    let store_result = log_store_worker_handle
        .join()
        .map_err(|_| anyhow!("log store worker thread panicked"))?;

    info!("Sync metrics: {}", metrics.snapshot());

    sync_result?;
    store_result?;
    Ok(())
}
