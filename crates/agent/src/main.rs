//! Repair Agent - predictive failure detection and adaptive remediation
//!
//! Samples each configured service from Prometheus every tick, predicts
//! failures, picks a corrective action and learns from its measured effect.

use anyhow::{Context, Result};
use repair_lib::{
    EngineState, HealthRegistry, RepairLoopBuilder, RepairMetrics, StructuredLogger,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod executor;
mod source;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting repair-agent");

    let config = config::AgentConfig::load()?;
    info!(
        node_name = %config.node_name,
        services = config.services.len(),
        prometheus = %config.prometheus_url,
        "Agent configured"
    );
    if config.services.is_empty() {
        warn!("No services configured; the loop will only tick");
    }

    let health_registry = HealthRegistry::new();
    health_registry.register_repair_components().await;

    let metrics = RepairMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);

    let state = EngineState::load(
        &config.store_config(),
        &config.policy_config(),
        &config.persistence_config(),
    )
    .context("Invalid policy configuration")?;

    let model_version = state.models().load().map(|group| group.version_label());
    health_registry.report_model(model_version.as_deref()).await;
    health_registry.report_policy(state.policy().len()).await;
    if let Some(version) = &model_version {
        metrics.set_model_version(version);
    }
    metrics.set_q_table_entries(state.policy().len());
    logger.log_startup(
        AGENT_VERSION,
        model_version.as_deref().unwrap_or("none"),
        config.services.len(),
    );

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));

    // Learned state is in place; serve traffic
    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let source = source::PrometheusSource::new(&config.prometheus_url, config.query_timeout())?;
    let repair_loop = RepairLoopBuilder::new()
        .state(state)
        .source(Arc::new(source))
        .executor(Arc::new(executor::DryRunExecutor))
        .config(config.loop_config())
        .training(config.training_config())
        .health(health_registry.clone())
        .node_name(&config.node_name)
        .build()?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let loop_handle = tokio::spawn(repair_loop.run(shutdown_rx));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        served = api_handle => {
            match served {
                Ok(Err(e)) => error!(error = %e, "API server stopped"),
                Err(e) => error!(error = %e, "API server task failed"),
                Ok(Ok(())) => warn!("API server exited"),
            }
            logger.log_shutdown("API server stopped");
        }
    }

    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());
    let state = loop_handle.await.context("Repair loop task failed")?;
    info!(
        model_version = state.models().version(),
        q_entries = state.policy().len(),
        "Shutdown complete"
    );

    Ok(())
}
