use std::sync::Arc;

use anyhow::{Context, Result};
use chaingraph::bitcoind::BitcoindClient;
use chaingraph::config::{get_config, init_config};
use chaingraph::core::{
    BlockAggregator, BlockCountThrottle, Importer, PrefetchCache, run_importer_loop,
    run_prefetch_loop,
};
use chaingraph::graph::RocksGraphStore;
use chaingraph::runtime::ImportStatus;
use chaingraph::runtime::server::run_status_server;
use chaingraph::runtime::status::StatusSink;
use tokio::runtime::Builder as TokioBuilder;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> Result<()> {
    init_config()?;
    let cfg = get_config();
    init_tracing(&cfg.log_level);

    // The blocking HTTP client owns an internal runtime and must not be built inside ours.
    let client = Arc::new(BitcoindClient::new(
        &cfg.bitcoind_rpc_url,
        cfg.rpc_auth(),
        cfg.rpc_timeout,
    )?);
    tracing::info!(url = client.url(), db_path = %cfg.db_path, "starting chaingraph");

    let store = Arc::new(
        RocksGraphStore::open(cfg.graph_db_path())
            .with_context(|| format!("failed to open graph store under {}", cfg.db_path))?,
    );
    let throttle = Arc::new(BlockCountThrottle::new(client.clone(), cfg.block_count_ttl));
    let aggregator =
        Arc::new(BlockAggregator::new(client.clone(), cfg.excluded_txids.iter().copied()));
    let cache = Arc::new(PrefetchCache::new(
        aggregator,
        cfg.prefetch_window,
        cfg.prefetch_concurrency,
    ));
    let status = Arc::new(ImportStatus::new());
    let sink: Arc<dyn StatusSink> = status.clone();
    let importer =
        Arc::new(Importer::new(throttle, cache.clone(), store, sink, cfg.first_height));

    let rt = TokioBuilder::new_multi_thread()
        .enable_all()
        .thread_name("chaingraph")
        .build()
        .context("failed to build tokio runtime")?;

    rt.block_on(async move {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let prefetch =
            tokio::spawn(run_prefetch_loop(cache, cfg.prefetch_interval, shutdown_rx.clone()));
        let importer =
            tokio::spawn(run_importer_loop(importer, cfg.pacing(), shutdown_rx.clone()));
        let server = cfg.status_host.map(|addr| {
            let rx = shutdown_rx.clone();
            let status = status.clone();
            tokio::spawn(async move {
                if let Err(e) = run_status_server(status, addr, rx).await {
                    tracing::error!(error = %format!("{e:#}"), "status server failed");
                }
            })
        });

        tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
        tracing::info!("shutdown requested, waiting for the current block to finish");
        let _ = shutdown_tx.send(true);

        if let Err(e) = importer.await {
            tracing::error!(error = %e, "importer task failed");
        }
        if let Err(e) = prefetch.await {
            tracing::error!(error = %e, "prefetch task failed");
        }
        if let Some(server) = server {
            let _ = server.await;
        }
        tracing::info!("chaingraph stopped");
        Ok(())
    })
}
