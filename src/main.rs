use std::sync::Arc;

use tracing::info;

use boardroom::compactor::run_compactor;
use boardroom::config::Config;
use boardroom::engine::Engine;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    boardroom::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let wal_path = config.wal_path();
    let engine = Arc::new(Engine::new(wal_path.clone())?);
    info!("boardroom store open");
    info!("  wal: {}", wal_path.display());
    info!("  venues: {}", engine.store().venue_count());
    info!("  bookings: {}", engine.store().booking_count());
    info!("  series: {}", engine.store().series_count());
    info!(
        "  compaction: every {}s past {} appends",
        config.compact_interval.as_secs(),
        config.compact_threshold
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let compactor = tokio::spawn(run_compactor(
        engine.clone(),
        config.compact_threshold,
        config.compact_interval,
    ));

    // Graceful shutdown on SIGTERM/ctrl-c
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received");

    compactor.abort();
    // Leave a compact log behind for the next start.
    if let Err(e) = engine.compact().await {
        tracing::warn!("final compaction skipped: {e}");
    }

    info!("boardroom stopped");
    Ok(())
}
