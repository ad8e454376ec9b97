//! HTTP API for health checks, Prometheus metrics and probe operations

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use probe_lib::{
    collect_addresses,
    health::{components, ComponentStatus, HealthRegistry},
    read_memory,
    remediation::DEFAULT_FACTOR,
    AddressGroup, ClusterApi, ClusterError, MetricsError, MetricsSource, ProbeContext,
    ProbeMetrics, RemediationApplier, RemediationError, RemediationSettings, RestartClassifier,
    StructuredLogger, SERVICE_IPS,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Shared application state
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: ProbeMetrics,
    pub logger: StructuredLogger,
    pub context: Arc<ProbeContext>,
    pub cluster: Arc<dyn ClusterApi>,
    pub metrics_source: Arc<dyn MetricsSource>,
    pub classifier: RestartClassifier,
    pub applier: RemediationApplier,
    /// Cancelled on shutdown to abort in-flight readiness waits
    pub shutdown: CancellationToken,
    remediation_lock: Mutex<()>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: ProbeContext,
        cluster: Arc<dyn ClusterApi>,
        metrics_source: Arc<dyn MetricsSource>,
        classifier: RestartClassifier,
        settings: RemediationSettings,
        health_registry: HealthRegistry,
        logger: StructuredLogger,
        shutdown: CancellationToken,
    ) -> Self {
        let context = Arc::new(context);
        let applier = RemediationApplier::new(cluster.clone(), context.clone(), settings);

        Self {
            health_registry,
            metrics: ProbeMetrics::new(),
            logger,
            context,
            cluster,
            metrics_source,
            classifier,
            applier,
            shutdown,
            remediation_lock: Mutex::new(()),
        }
    }
}

/// Error body returned by the probe operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

fn error_response(status: StatusCode, code: &str, message: impl ToString) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
            code: code.to_string(),
        }),
    )
        .into_response()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod: Option<String>,
    pub restarts: Vec<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediateRequest {
    pub pod: String,
    /// Defaults to 2; values below 1 are replaced by 2
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factor: Option<i64>,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Service and pod addresses of the watched workload
async fn addresses(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let start = Instant::now();
    let group = collect_addresses(&state.context, state.cluster.as_ref()).await;

    state
        .metrics
        .observe_address_collection(start.elapsed().as_secs_f64(), &group);
    state.logger.log_addresses(&state.context, &group);

    match unresolved_reason(&group) {
        Some(reason) => {
            state
                .health_registry
                .set_degraded(components::CLUSTER_API, reason)
                .await
        }
        None => state.health_registry.set_healthy(components::CLUSTER_API).await,
    }

    Json(group)
}

/// Why a discovery pass was incomplete, service lookup failures first
fn unresolved_reason(group: &AddressGroup) -> Option<String> {
    group
        .unresolved
        .get_key_value(SERVICE_IPS)
        .or_else(|| group.unresolved.iter().next())
        .map(|(category, reason)| format!("{}: {}", category, reason))
}

/// Current memory usage of a pod
async fn pod_memory(State(state): State<Arc<AppState>>, Path(pod): Path<String>) -> Response {
    match read_memory(&state.context, state.metrics_source.as_ref(), &pod).await {
        Ok(reading) => {
            state.health_registry.set_healthy(components::METRICS_API).await;
            state.metrics.set_last_memory(reading.memory_usage_bytes);
            state.logger.log_memory(&reading);
            Json(reading).into_response()
        }
        Err(e) => {
            state.metrics.inc_memory_read_errors();
            let (status, code) = match &e {
                MetricsError::Unavailable { source, .. } if source.is_not_found() => {
                    (StatusCode::NOT_FOUND, "not_found")
                }
                MetricsError::Unavailable { .. } => {
                    state
                        .health_registry
                        .set_degraded(components::METRICS_API, e.to_string())
                        .await;
                    (StatusCode::BAD_GATEWAY, "metrics_unavailable")
                }
                MetricsError::NoContainerUsage { .. } => {
                    (StatusCode::NOT_FOUND, "no_container_usage")
                }
                MetricsError::InvalidQuantity { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "invalid_quantity")
                }
            };
            error_response(status, code, e)
        }
    }
}

/// Classify a restart series
async fn classify(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ClassifyRequest>,
) -> impl IntoResponse {
    let verdict = state.classifier.classify(&request.restarts);

    if verdict.out_of_memory {
        state.metrics.inc_oom_classifications();
    }
    state
        .logger
        .log_classification(request.pod.as_deref(), &verdict);

    Json(verdict)
}

/// Raise the deployment memory limit and wait for it to become ready
async fn remediate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RemediateRequest>,
) -> Response {
    let Ok(_guard) = state.remediation_lock.try_lock() else {
        return error_response(
            StatusCode::CONFLICT,
            "remediation_in_progress",
            format!("a remediation of {} is already running", state.context.deployment),
        );
    };

    let factor = request.factor.unwrap_or(DEFAULT_FACTOR);
    let cancel = state.shutdown.child_token();

    info!(pod = %request.pod, factor, "Remediation requested");

    match state.applier.apply(factor, &request.pod, &cancel).await {
        Ok(outcome) => {
            state.health_registry.set_healthy(components::REMEDIATION).await;
            state.logger.log_remediation(&outcome);
            Json(outcome).into_response()
        }
        Err(e) => {
            state
                .logger
                .log_remediation_failure(&state.context, &request.pod, &e.to_string());
            state
                .health_registry
                .set_degraded(components::REMEDIATION, e.to_string())
                .await;
            if let Some(source) = cluster_failure(&e) {
                state
                    .health_registry
                    .set_degraded(components::CLUSTER_API, source.to_string())
                    .await;
            }

            let (status, code) = remediation_status(&e);
            error_response(status, code, e)
        }
    }
}

/// Cluster errors other than not-found that caused a remediation failure
fn cluster_failure(e: &RemediationError) -> Option<&ClusterError> {
    match e {
        RemediationError::Fetch { source, .. } | RemediationError::Update { source, .. }
            if !source.is_not_found() =>
        {
            Some(source)
        }
        _ => None,
    }
}

fn remediation_status(e: &RemediationError) -> (StatusCode, &'static str) {
    match e {
        RemediationError::LimitOverflow { .. } => (StatusCode::BAD_REQUEST, "invalid_factor"),
        RemediationError::Fetch { source, .. } if source.is_not_found() => {
            (StatusCode::NOT_FOUND, "not_found")
        }
        RemediationError::Fetch { .. } | RemediationError::Update { .. } => {
            (StatusCode::BAD_GATEWAY, "cluster_error")
        }
        RemediationError::ContainerMissing { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "container_missing")
        }
        RemediationError::RetryExhausted { .. } => (StatusCode::CONFLICT, "conflict"),
        RemediationError::ReadyTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "ready_timeout"),
        RemediationError::Cancelled { .. } => (StatusCode::SERVICE_UNAVAILABLE, "cancelled"),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/addresses", get(addresses))
        .route("/api/v1/pods/:pod/memory", get(pod_memory))
        .route("/api/v1/classify", post(classify))
        .route("/api/v1/remediate", post(remediate))
        .with_state(state)
}

/// Start the API server; stops when the state's shutdown token fires
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_remediation_status_mapping() {
        let timeout = RemediationError::ReadyTimeout {
            deployment: "coredns".to_string(),
            waited: Duration::from_secs(600),
        };
        assert_eq!(
            remediation_status(&timeout),
            (StatusCode::GATEWAY_TIMEOUT, "ready_timeout")
        );

        let missing = RemediationError::Fetch {
            deployment: "coredns".to_string(),
            source: ClusterError::NotFound("deployments \"coredns\" not found".to_string()),
        };
        assert_eq!(remediation_status(&missing), (StatusCode::NOT_FOUND, "not_found"));
        assert!(cluster_failure(&missing).is_none());

        let exhausted = RemediationError::RetryExhausted {
            deployment: "coredns".to_string(),
            attempts: 5,
        };
        assert_eq!(remediation_status(&exhausted), (StatusCode::CONFLICT, "conflict"));
    }

    #[test]
    fn test_unresolved_reason_covers_every_category() {
        let mut group = AddressGroup::new();
        group.extend(SERVICE_IPS, vec!["10.96.0.10".to_string()]);
        assert_eq!(unresolved_reason(&group), None);

        group.mark_unresolved(probe_lib::POD_IPS, "pods is forbidden");
        assert_eq!(
            unresolved_reason(&group).as_deref(),
            Some("Pod IPs: pods is forbidden")
        );

        group.mark_unresolved(SERVICE_IPS, "services \"kube-dns\" not found");
        assert!(unresolved_reason(&group)
            .unwrap()
            .starts_with("Service IPs:"));
    }

    #[test]
    fn test_cluster_failures_are_reported() {
        let update = RemediationError::Update {
            deployment: "coredns".to_string(),
            source: ClusterError::InvalidObject("rejected".to_string()),
        };
        assert!(cluster_failure(&update).is_some());
        assert_eq!(
            remediation_status(&update),
            (StatusCode::BAD_GATEWAY, "cluster_error")
        );
    }
}
