//! Ingestor service binary

use anyhow::{anyhow, Result};
use barflow_ingestor::logging::init_logging;
use barflow_ingestor::{
    InMemoryRegistry, IngestionLoop, LoopConfig, MemoryBarSink, MemoryIndicatorSink,
    PolygonSource, SourceStats,
};
use indicators::IndicatorEngine;
use service_config::IngestorConfig;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = IngestorConfig::load()?;
    init_logging(&config.logging)?;

    info!(
        symbols = config.symbols.len(),
        url = %config.polygon.url,
        "Starting ingestor"
    );

    let market_tz = config.engine.market_tz().map_err(|e| anyhow!(e))?;
    let engine = Arc::new(IndicatorEngine::standard(market_tz));
    let registry = Arc::new(InMemoryRegistry::from_reference(&config.reference));
    let bar_sink = Arc::new(MemoryBarSink::new());
    let indicator_sink = Arc::new(MemoryIndicatorSink::new());

    let stats = Arc::new(SourceStats::default());
    let source = PolygonSource::from_config(&config, stats.clone());

    let ingestion = IngestionLoop::new(
        LoopConfig::from(&config),
        engine.clone(),
        registry,
        bar_sink.clone(),
        indicator_sink.clone(),
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                shutdown.cancel();
            }
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    ingestion.warm_up(&config.symbols).await;

    info!("Ingestor running, press Ctrl+C to stop");
    let summary = ingestion.run(source, cancel).await;

    let source_stats = stats.snapshot();
    let engine_stats = engine.stats();
    info!(
        connect_attempts = source_stats.connect_attempts,
        reconnects = source_stats.reconnects,
        malformed = source_stats.malformed,
        sessions = engine.session_count(),
        rejected_bars = engine_stats.rejected_bars,
        calculator_failures = engine_stats.calculator_failures,
        stored_bars = bar_sink.len(),
        stored_indicators = indicator_sink.len(),
        "Ingestor stopped"
    );

    let summary = summary?;
    info!(?summary, "Ingestion summary");
    Ok(())
}
