//! Process entry point: load configuration, initialize structured logging,
//! construct the store/client stack, run the observer's startup sequence
//! (§4.9), and serve the HTTP read/write API (§6) alongside the background
//! poll and lock-monitor tasks.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

use btc_observer::bitcoin_client::{BitcoinClient, RpcBitcoinClient};
use btc_observer::config::ObserverConfig;
use btc_observer::lock::{InMemoryLockTransactionStore, LockMonitor, LockResolver};
use btc_observer::processor::BitcoinProcessor;
use btc_observer::store::{InMemoryBlockMetadataStore, InMemoryQuantileGroupStore, InMemoryServiceStateStore, InMemoryTransactionStore};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "observer.toml".to_string());
    let config = ObserverConfig::from_path(&config_path)
        .with_context(|| format!("failed to load observer config from {config_path}"))?;

    tracing::info!(
        peer = %config.bitcoin_peer_uri,
        genesis = config.genesis_block_number,
        prefix = %config.sidetree_transaction_prefix,
        "starting sidetree bitcoin observer"
    );

    let client: Arc<dyn BitcoinClient> = Arc::new(RpcBitcoinClient::new(
        &config.bitcoin_peer_uri,
        &config.bitcoin_rpc_username,
        &config.bitcoin_rpc_password,
        &config.bitcoin_wallet_or_import_string,
        config.request_timeout_in_milliseconds,
        config.request_max_retries,
        config.sidetree_transaction_fee_markup_percentage,
        config.default_transaction_fee_in_satoshis_per_kb,
    )?);

    let transaction_store = Arc::new(InMemoryTransactionStore::new());
    let block_metadata_store = Arc::new(InMemoryBlockMetadataStore::new());
    let service_state_store = Arc::new(InMemoryServiceStateStore::new());
    let quantile_group_store = Arc::new(InMemoryQuantileGroupStore::new());

    let processor = BitcoinProcessor::new(
        config.clone(),
        client.clone(),
        transaction_store,
        block_metadata_store,
        service_state_store,
        quantile_group_store,
    )
    .await
    .context("failed to construct BitcoinProcessor")?;

    // §4.9: client reachability + fast-sync/catch-up before anything else
    // starts depending on a warm fee calculator.
    processor.initialize().await.context("observer initialization failed")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poll_handle = {
        let processor = processor.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(processor.run_periodic_poll(shutdown_rx))
    };

    // Lock monitor started last, per §4.9 step 5: "must be last — it
    // depends on the fee calculator being warm."
    let lock_handle = {
        let client = client.clone();
        let shutdown_rx = shutdown_rx.clone();
        let poll_period = Duration::from_secs(config.value_time_lock_poll_period_in_seconds);
        tokio::spawn(async move {
            let (events_tx, mut events_rx) = mpsc::channel(8);
            let monitor = LockMonitor::new(poll_period, events_tx, shutdown_rx);
            let resolver = LockResolver::new(client);
            let store = InMemoryLockTransactionStore::new();

            tokio::spawn(async move { while events_rx.recv().await.is_some() {} });

            if let Err(err) = monitor.run(resolver, store).await {
                tracing::error!(error = %err, "lock monitor exited with an error");
            }
        })
    };

    let app = btc_observer::api::router(processor);
    let listener = tokio::net::TcpListener::bind(&config.http_listen_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {}", config.http_listen_addr))?;
    tracing::info!(addr = %config.http_listen_addr, "serving sidetree read/write API");

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    if let Err(err) = server.await {
        tracing::error!(error = %err, "http server exited with an error");
    }

    poll_handle.abort();
    lock_handle.abort();
    Ok(())
}
