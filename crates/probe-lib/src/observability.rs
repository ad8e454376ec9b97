//! Observability infrastructure for the heal probe
//!
//! Provides:
//! - Prometheus metrics (address discovery, memory reads, classifications, remediations)
//! - Structured JSON logging with tracing

use crate::models::{AddressGroup, MemoryReading, ProbeContext, RemediationOutcome, RestartVerdict};
use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, register_int_gauge_vec,
    Histogram, IntCounter, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for API latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// Buckets for rollout waits (in seconds)
const READY_WAIT_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ProbeMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct ProbeMetricsInner {
    address_collection_latency_seconds: Histogram,
    addresses_found: IntGaugeVec,
    memory_read_errors: IntCounter,
    last_memory_bytes: IntGauge,
    oom_classifications: IntCounter,
    remediations: IntCounter,
    remediation_failures: IntCounter,
    update_conflicts: IntCounter,
    ready_wait_seconds: Histogram,
}

impl ProbeMetricsInner {
    fn new() -> Self {
        Self {
            address_collection_latency_seconds: register_histogram!(
                "heal_probe_address_collection_latency_seconds",
                "Time spent resolving service and pod addresses",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register address_collection_latency_seconds"),

            addresses_found: register_int_gauge_vec!(
                "heal_probe_addresses_found",
                "Addresses found in the last discovery, by category",
                &["category"]
            )
            .expect("Failed to register addresses_found"),

            memory_read_errors: register_int_counter!(
                "heal_probe_memory_read_errors_total",
                "Total number of failed pod memory reads"
            )
            .expect("Failed to register memory_read_errors"),

            last_memory_bytes: register_int_gauge!(
                "heal_probe_last_memory_bytes",
                "Memory usage returned by the last successful read"
            )
            .expect("Failed to register last_memory_bytes"),

            oom_classifications: register_int_counter!(
                "heal_probe_oom_classifications_total",
                "Total number of restart series classified as out-of-memory"
            )
            .expect("Failed to register oom_classifications"),

            remediations: register_int_counter!(
                "heal_probe_remediations_total",
                "Total number of remediation runs started"
            )
            .expect("Failed to register remediations"),

            remediation_failures: register_int_counter!(
                "heal_probe_remediation_failures_total",
                "Total number of remediation runs that failed"
            )
            .expect("Failed to register remediation_failures"),

            update_conflicts: register_int_counter!(
                "heal_probe_update_conflicts_total",
                "Total number of deployment updates rejected with a write conflict"
            )
            .expect("Failed to register update_conflicts"),

            ready_wait_seconds: register_histogram!(
                "heal_probe_ready_wait_seconds",
                "Time spent waiting for a remediated deployment to become ready",
                READY_WAIT_BUCKETS.to_vec()
            )
            .expect("Failed to register ready_wait_seconds"),
        }
    }
}

/// Probe metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ProbeMetrics {
    _private: (),
}

impl Default for ProbeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ProbeMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ProbeMetricsInner {
        GLOBAL_METRICS.get_or_init(ProbeMetricsInner::new)
    }

    /// Record an address discovery pass
    pub fn observe_address_collection(&self, duration_secs: f64, group: &AddressGroup) {
        let inner = self.inner();
        inner.address_collection_latency_seconds.observe(duration_secs);
        for (category, addresses) in &group.addresses {
            inner
                .addresses_found
                .with_label_values(&[category.as_str()])
                .set(addresses.len() as i64);
        }
        // An unresolved category must not keep reporting its last count
        for category in group.unresolved.keys() {
            inner
                .addresses_found
                .with_label_values(&[category.as_str()])
                .set(0);
        }
    }

    pub fn set_last_memory(&self, bytes: u64) {
        self.inner()
            .last_memory_bytes
            .set(i64::try_from(bytes).unwrap_or(i64::MAX));
    }

    pub fn inc_memory_read_errors(&self) {
        self.inner().memory_read_errors.inc();
    }

    pub fn inc_oom_classifications(&self) {
        self.inner().oom_classifications.inc();
    }

    pub fn inc_remediations(&self) {
        self.inner().remediations.inc();
    }

    pub fn inc_remediation_failures(&self) {
        self.inner().remediation_failures.inc();
    }

    pub fn inc_update_conflicts(&self) {
        self.inner().update_conflicts.inc();
    }

    pub fn observe_ready_wait(&self, duration_secs: f64) {
        self.inner().ready_wait_seconds.observe(duration_secs);
    }
}

/// Structured logger for probe events
///
/// Provides consistent JSON-formatted logging for discovery, memory reads,
/// classifications and remediations.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    /// Log probe startup
    pub fn log_startup(&self, version: &str, context: &ProbeContext) {
        info!(
            event = "probe_started",
            node = %self.node_name,
            probe_version = %version,
            namespace = %context.namespace,
            service = %context.service_name,
            deployment = %context.deployment,
            "Heal probe started"
        );
    }

    /// Log probe shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "probe_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Heal probe shutting down"
        );
    }

    pub fn log_addresses(&self, context: &ProbeContext, group: &AddressGroup) {
        if group.is_complete() {
            info!(
                event = "addresses_collected",
                node = %self.node_name,
                namespace = %context.namespace,
                service = %context.service_name,
                addresses = group.len(),
                "Collected workload addresses"
            );
        } else {
            warn!(
                event = "addresses_collected",
                node = %self.node_name,
                namespace = %context.namespace,
                service = %context.service_name,
                addresses = group.len(),
                unresolved = ?group.unresolved.keys().collect::<Vec<_>>(),
                "Collected partial workload addresses"
            );
        }
    }

    pub fn log_memory(&self, reading: &MemoryReading) {
        info!(
            event = "memory_read",
            node = %self.node_name,
            namespace = %reading.namespace,
            pod_name = %reading.pod_name,
            container = %reading.container,
            memory_usage_bytes = reading.memory_usage_bytes,
            "Read pod memory usage"
        );
    }

    /// Log a restart classification
    pub fn log_classification(&self, pod_name: Option<&str>, verdict: &RestartVerdict) {
        if verdict.out_of_memory {
            warn!(
                event = "oom_classified",
                node = %self.node_name,
                pod_name = pod_name.unwrap_or_default(),
                restart_count = verdict.restart_count,
                span_millis = ?verdict.span_millis,
                window_secs = verdict.window_secs,
                "Restart pattern indicates out-of-memory"
            );
        } else {
            info!(
                event = "oom_classified",
                node = %self.node_name,
                pod_name = pod_name.unwrap_or_default(),
                restart_count = verdict.restart_count,
                span_millis = ?verdict.span_millis,
                window_secs = verdict.window_secs,
                "Restart pattern looks transient"
            );
        }
    }

    /// Log a completed remediation
    pub fn log_remediation(&self, outcome: &RemediationOutcome) {
        info!(
            event = "remediation_applied",
            node = %self.node_name,
            namespace = %outcome.namespace,
            deployment = %outcome.deployment,
            container = %outcome.container,
            pod_name = %outcome.pod_name,
            factor = outcome.factor,
            memory_limit_bytes = outcome.memory_limit_bytes,
            update_attempts = outcome.update_attempts,
            ready_wait_millis = outcome.ready_wait_millis,
            "Memory limit raised and deployment ready"
        );
    }

    /// Log a failed remediation
    pub fn log_remediation_failure(&self, context: &ProbeContext, pod_name: &str, error: &str) {
        warn!(
            event = "remediation_failed",
            node = %self.node_name,
            namespace = %context.namespace,
            deployment = %context.deployment,
            pod_name = %pod_name,
            error = %error,
            "Remediation failed"
        );
    }
}
