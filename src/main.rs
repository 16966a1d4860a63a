//! Vigil Binary Entry Point
//!
//! This binary runs the collection agent.
//! Core functionality is provided by the `vigil` library crate.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil::{
    collector::{Scheduler, SelfReportCollector},
    config::{AppConfig, DEFAULT_CONFIG_PATH},
    pipeline::DeliveryPipeline,
};

/// Vigil - Metrics Collection Agent
#[derive(Parser, Debug)]
#[command(name = "vigil", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "VIGIL_CONFIG")]
    config: String,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,vigil=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    tracing::info!(path = %cli.config, "Loading configuration");
    let config = AppConfig::load(&cli.config)?;

    let global_tags = config.agent.global_tags();
    tracing::info!(
        host = global_tags.get("host").map(String::as_str).unwrap_or_default(),
        collectors = config.collectors.len(),
        sinks = config.sinks.len(),
        "Configuration valid"
    );

    if cli.check {
        return Ok(());
    }

    // Build delivery pipeline
    let mut builder = DeliveryPipeline::builder(config.pipeline.clone());
    for (sink, encoder) in config.sinks.build()? {
        builder = builder.sink(sink, encoder);
    }
    let pipeline = builder.build()?;

    // Start collectors
    let mut scheduler = Scheduler::new(pipeline.handle())
        .with_global_tags(global_tags)
        .with_error_delay(config.agent.error_delay);

    for collector in config.collectors.build()? {
        scheduler.spawn(collector)?;
    }
    if let Some(interval) = config.agent.self_report_interval() {
        let collector = SelfReportCollector::new(pipeline.handle(), interval);
        scheduler.spawn(Arc::new(collector))?;
    }

    tracing::info!(jobs = scheduler.job_count(), "Vigil started, press Ctrl+C to shutdown");

    shutdown_signal().await;

    tracing::info!("Shutting down collectors...");
    scheduler.shutdown().await;

    tracing::info!("Draining delivery pipeline...");
    let snapshot = pipeline.shutdown().await;
    for sink in &snapshot.sinks {
        tracing::info!(
            sink = %sink.sink,
            delivered = sink.delivered,
            drops = sink.drops(),
            evictions = sink.evictions,
            "Sink totals"
        );
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
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
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
