//! Probe configuration

use anyhow::{Context, Result};
use probe_lib::remediation::DEFAULT_BASELINE_MEMORY_BYTES;
use probe_lib::{ProbeContext, RemediationSettings, RestartClassifier, RetryPolicy};
use serde::Deserialize;
use std::time::Duration;

/// Probe configuration, read from `PROBE_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Node name from Kubernetes downward API
    #[serde(default = "default_node_name")]
    pub node_name: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Service whose addresses are discovered
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Deployment whose memory limit is remediated
    #[serde(default = "default_deployment")]
    pub deployment: String,

    #[serde(default)]
    pub container_index: usize,

    #[serde(default = "default_baseline_memory_bytes")]
    pub baseline_memory_bytes: u64,

    /// API server port for health/metrics and probe operations
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_ready_poll_interval_ms")]
    pub ready_poll_interval_ms: u64,

    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,

    /// Restarts within this many seconds count as out-of-memory
    #[serde(default = "default_oom_window_secs")]
    pub oom_window_secs: u64,

    #[serde(default = "default_min_restarts")]
    pub min_restarts: usize,

    #[serde(default = "default_retry_steps")]
    pub retry_steps: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_namespace() -> String {
    "kube-system".to_string()
}

fn default_service_name() -> String {
    "kube-dns".to_string()
}

fn default_deployment() -> String {
    "coredns".to_string()
}

fn default_baseline_memory_bytes() -> u64 {
    DEFAULT_BASELINE_MEMORY_BYTES
}

fn default_api_port() -> u16 {
    8080
}

fn default_ready_poll_interval_ms() -> u64 {
    500
}

fn default_ready_timeout_secs() -> u64 {
    600
}

fn default_oom_window_secs() -> u64 {
    30
}

fn default_min_restarts() -> usize {
    2
}

fn default_retry_steps() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    10
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            namespace: default_namespace(),
            service_name: default_service_name(),
            deployment: default_deployment(),
            container_index: 0,
            baseline_memory_bytes: default_baseline_memory_bytes(),
            api_port: default_api_port(),
            ready_poll_interval_ms: default_ready_poll_interval_ms(),
            ready_timeout_secs: default_ready_timeout_secs(),
            oom_window_secs: default_oom_window_secs(),
            min_restarts: default_min_restarts(),
            retry_steps: default_retry_steps(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl ProbeConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        config::Config::builder()
            .add_source(config::Environment::with_prefix("PROBE").try_parsing(true))
            .build()
            .context("Failed to read probe configuration")?
            .try_deserialize()
            .context("Invalid probe configuration")
    }

    pub fn context(&self) -> ProbeContext {
        ProbeContext::new(&self.namespace, &self.service_name, &self.deployment)
            .with_container_index(self.container_index)
    }

    pub fn remediation_settings(&self) -> RemediationSettings {
        RemediationSettings {
            baseline_memory_bytes: self.baseline_memory_bytes,
            retry: RetryPolicy {
                steps: self.retry_steps,
                backoff: Duration::from_millis(self.retry_backoff_ms),
                ..Default::default()
            },
            poll_interval: Duration::from_millis(self.ready_poll_interval_ms),
            ready_timeout: Duration::from_secs(self.ready_timeout_secs),
        }
    }

    pub fn classifier(&self) -> RestartClassifier {
        RestartClassifier::new(Duration::from_secs(self.oom_window_secs), self.min_restarts)
    }
}
