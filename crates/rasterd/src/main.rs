mod config;
mod metrics;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tileraster::{
    LayerMaps, RasterCreator, RasterReader, ShapefileSource, Tile, TileQueue, TileRasterService,
    WorkerHandle,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;
use crate::metrics::Metrics;

const BATCH_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Initialization ---
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();
    let config = Config::parse();
    tracing::info!(config = ?config, "rasterd starting with configuration");

    let tile_names = config.tile_names()?;
    let maps = match &config.class_tables {
        Some(path) => LayerMaps::from_json_file(path)
            .with_context(|| format!("Failed to load class tables from {}", path.display()))?,
        None => LayerMaps::topographic(),
    };
    tracing::info!(
        terrain_classes = maps.terrain_type.len(),
        buildings_roads_classes = maps.buildings_roads.len(),
        "Class/value maps ready"
    );

    std::fs::create_dir_all(&config.intermediate_dir).with_context(|| {
        format!(
            "Failed to create intermediate directory {}",
            config.intermediate_dir.display()
        )
    })?;

    let metrics = Arc::new(Metrics::new().context("Failed to create metrics registry")?);

    // --- 2. Start Metrics Server ---
    if let Some(addr) = config.metrics_listen_addr {
        let router = metrics.router();
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind metrics listener on {addr}"))?;
        tracing::info!(addr = %addr, "Metrics server started");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router.into_make_service()).await {
                tracing::error!(error = %e, "Metrics server failed");
            }
        });
    }

    // --- 3. Spawn the worker ---
    let cancel = CancellationToken::new();
    let queue = Arc::new(TileQueue::new());
    let creator = RasterCreator::with_feature_source(
        &config.source_dir,
        config.creator_config(),
        Box::new(ShapefileSource::new(config.class_field.as_str())),
    );

    let worker = TileRasterService::new(
        Arc::clone(&queue),
        Box::new(RasterReader::new()),
        Box::new(creator),
        Arc::new(maps),
        cancel.clone(),
    )
    .with_events(metrics.clone())
    .with_config(config.worker_config())
    .spawn()
    .context("Failed to spawn tile raster worker")?;

    // --- 4. Queue the batch ---
    let completed = Arc::new(AtomicUsize::new(0));
    let batch: Vec<Arc<Tile>> = tile_names
        .iter()
        .map(|name| {
            let tile = Tile::new(name.as_str(), config.raster_version.as_str(), &config.intermediate_dir)
                .with_cancellation(cancel.child_token())
                .with_completion_counter(Arc::clone(&completed));
            Arc::new(tile)
        })
        .collect();

    metrics.tiles_pending.set(batch.len() as i64);
    for tile in &batch {
        queue.enqueue(Arc::clone(tile));
    }
    tracing::info!(tiles = batch.len(), "Tiles queued");

    // --- 5. Wait for the batch or a shutdown signal ---
    let interrupted = tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received.");
            true
        },
        _ = wait_for_batch(&batch, &worker), if !config.keep_running => {
            tracing::info!(completed = completed.load(Ordering::Acquire), "Batch wait over.");
            false
        },
    };

    worker.cancel();
    tokio::task::spawn_blocking(move || worker.join())
        .await
        .context("Failed to join tile raster worker")?
        .map_err(|_| anyhow::anyhow!("Tile raster worker panicked"))?;

    // --- 6. Report ---
    let mut failed = 0usize;
    for tile in &batch {
        if let Some(failure) = tile.failure() {
            failed += 1;
            tracing::error!(tile = tile.name(), layer = %failure.layer, error = %failure.error, "Tile failed");
        }
    }
    let unfinished = batch.iter().filter(|t| !t.is_finished()).count();

    tracing::info!(
        completed = completed.load(Ordering::Acquire),
        failed,
        unfinished,
        "rasterd shutting down."
    );

    anyhow::ensure!(failed == 0, "{failed} of {} tiles failed", batch.len());
    anyhow::ensure!(
        interrupted || unfinished == 0,
        "{unfinished} of {} tiles never finished",
        batch.len()
    );
    Ok(())
}

/// Resolves once every tile of the batch is complete or failed, or when the
/// worker thread is gone and nothing more will finish.
async fn wait_for_batch(batch: &[Arc<Tile>], worker: &WorkerHandle) {
    let mut interval = tokio::time::interval(BATCH_POLL_INTERVAL);
    loop {
        interval.tick().await;
        if batch.iter().all(|tile| tile.is_finished()) {
            return;
        }
        if worker.is_finished() {
            tracing::error!("Tile raster worker exited with tiles outstanding");
            return;
        }
    }
}

/// Listens for OS shutdown signals (SIGINT, SIGTERM) and resolves when one is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
