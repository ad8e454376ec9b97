//! Heal Probe - cluster DNS self-healing probe
//!
//! Runs in-cluster next to the watched workload, exposing address discovery,
//! memory readings, restart classification and memory-limit remediation.

use anyhow::{Context, Result};
use heal_probe::{api, config::ProbeConfig, shutdown};
use probe_lib::{
    health::{components, HealthRegistry},
    KubeCluster, KubeMetrics, StructuredLogger,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const PROBE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting heal-probe");

    let config = ProbeConfig::load()?;
    let context = config.context();
    info!(
        node_name = %config.node_name,
        namespace = %context.namespace,
        service = %context.service_name,
        deployment = %context.deployment,
        "Probe configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::CLUSTER_API).await;
    health_registry.register(components::METRICS_API).await;
    health_registry.register(components::REMEDIATION).await;

    let logger = StructuredLogger::new(&config.node_name);
    logger.log_startup(PROBE_VERSION, &context);

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let shutdown_token = CancellationToken::new();
    let app_state = Arc::new(api::AppState::new(
        context,
        Arc::new(KubeCluster::new(client.clone())),
        Arc::new(KubeMetrics::new(client)),
        config.classifier(),
        config.remediation_settings(),
        health_registry.clone(),
        logger.clone(),
        shutdown_token.clone(),
    ));

    // Mark probe as ready after initialization
    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Wait for SIGINT or SIGTERM (sent by the kubelet on pod termination)
    shutdown::shutdown_on(
        shutdown::shutdown_signal(),
        &health_registry,
        &logger,
        &shutdown_token,
    )
    .await;

    match api_handle.await {
        Ok(Ok(())) => info!("API server stopped"),
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task panicked"),
    }

    info!("Shutting down");
    Ok(())
}
