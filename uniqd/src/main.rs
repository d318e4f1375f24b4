//! Process bootstrap: config, controller, engines, HTTP surfaces.

use std::{process, sync::Arc};

use arrival_store::ArrivalController;
use core_types::config::AppConfig;
use engine_api::{Engine, EngineError};
use event_sink::{EventSink, HttpEventSink, LogEventSink, SinkError};
use flush_service::FlushService;
use ingest_service::{IngestError, IngestService};
use log::{error, info};
use metrics::Metrics;
use sweep_engine::{SweepEngine, SweepEngineConfig};
use thiserror::Error;

#[tokio::main]
async fn main() {
    env_logger::init();
    if let Err(err) = run().await {
        eprintln!("uniqd failed: {err}");
        process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let config = AppConfig::load()?;

    let metrics = Arc::new(Metrics::new());
    let controller = Arc::new(ArrivalController::new(&config.engine));

    info!(
        "uniqd booting: dedup window {}s, sweep every {}s (cap {}), flush every {}s",
        config.engine.dedup_window_s,
        config.engine.sweep_interval_s,
        config.engine.max_evictions_per_sweep,
        config.engine.aggregation_window_s
    );

    let sink: Arc<dyn EventSink> = match &config.sink.url {
        Some(url) => {
            info!("publishing window counts to {url}");
            Arc::new(HttpEventSink::new(url.clone(), config.sink.timeout())?)
        }
        None => {
            info!("no sink configured; window counts will be logged");
            Arc::new(LogEventSink)
        }
    };

    let sweeper = SweepEngine::new(
        SweepEngineConfig {
            label: "uniqd".to_string(),
            interval: config.engine.sweep_interval(),
        },
        Arc::clone(&controller),
        Arc::clone(&metrics),
    );
    sweeper.start()?;

    let flusher = FlushService::new(
        Arc::clone(&controller),
        sink,
        Arc::clone(&metrics),
        config.engine.aggregation_window(),
    )
    .start();

    let metrics_listener = tokio::net::TcpListener::bind(&config.http.metrics_addr).await?;
    info!("metrics listening on {}", config.http.metrics_addr);
    let metrics_server = {
        let metrics = Arc::clone(&metrics);
        tokio::spawn(async move {
            if let Err(err) = metrics.serve(metrics_listener).await {
                error!("metrics server exited: {err}");
            }
        })
    };

    let ingest = Arc::new(IngestService::new(
        Arc::clone(&controller),
        Arc::clone(&metrics),
        &config.notify,
    )?);
    let ingest_listener = tokio::net::TcpListener::bind(&config.http.listen_addr).await?;
    info!("ingest listening on {}", config.http.listen_addr);
    let ingest_server = {
        let ingest = Arc::clone(&ingest);
        tokio::spawn(async move {
            if let Err(err) = ingest.serve(ingest_listener).await {
                error!("ingest server exited: {err}");
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received; stopping workers");

    ingest_server.abort();
    metrics_server.abort();
    flusher.abort();
    sweeper.stop()?;

    info!(
        "uniqd stopped with {} live dedup entries and {} uniques in the open window",
        controller.live_entries(),
        controller.unique_count()
    );
    Ok(())
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
