//! Core data models for the heal probe

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Category label for the service cluster addresses
pub const SERVICE_IPS: &str = "Service IPs";
/// Category label for the backing pod addresses
pub const POD_IPS: &str = "Pod IPs";

/// The workload the probe watches over
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeContext {
    pub namespace: String,
    pub service_name: String,
    pub deployment: String,
    /// Container slot in the pod template whose memory limit is remediated
    pub container_index: usize,
}

impl ProbeContext {
    pub fn new(
        namespace: impl Into<String>,
        service_name: impl Into<String>,
        deployment: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            service_name: service_name.into(),
            deployment: deployment.into(),
            container_index: 0,
        }
    }

    pub fn with_container_index(mut self, index: usize) -> Self {
        self.container_index = index;
        self
    }
}

/// Addresses of a workload grouped by kind
///
/// Categories that could not be resolved are missing from `addresses`
/// and carry the reason in `unresolved`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressGroup {
    pub addresses: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unresolved: BTreeMap<String, String>,
}

impl AddressGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append addresses under a category, creating it if needed
    pub fn extend(&mut self, category: &str, addresses: impl IntoIterator<Item = String>) {
        self.addresses
            .entry(category.to_string())
            .or_default()
            .extend(addresses);
    }

    /// Record that a category could not be resolved
    pub fn mark_unresolved(&mut self, category: &str, reason: impl Into<String>) {
        self.unresolved.insert(category.to_string(), reason.into());
    }

    pub fn get(&self, category: &str) -> Option<&[String]> {
        self.addresses.get(category).map(Vec::as_slice)
    }

    pub fn service_ips(&self) -> Option<&[String]> {
        self.get(SERVICE_IPS)
    }

    pub fn pod_ips(&self) -> Option<&[String]> {
        self.get(POD_IPS)
    }

    /// Total number of addresses across all categories
    pub fn len(&self) -> usize {
        self.addresses.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Memory usage of one container of one pod at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryReading {
    pub pod_name: String,
    pub namespace: String,
    pub container: String,
    pub memory_usage_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
}

/// Pod usage as served by the metrics API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodMetrics {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub window: Option<String>,
    #[serde(default)]
    pub containers: Vec<ContainerUsage>,
}

/// Per-container raw resource usage quantities
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerUsage {
    pub name: String,
    #[serde(default)]
    pub usage: BTreeMap<String, String>,
}

impl ContainerUsage {
    pub fn memory(&self) -> Option<&str> {
        self.usage.get("memory").map(String::as_str)
    }
}

/// Result of classifying a restart series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartVerdict {
    pub restart_count: usize,
    /// Milliseconds between the earliest and the latest restart
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_millis: Option<i64>,
    pub window_secs: u64,
    pub min_restarts: usize,
    pub out_of_memory: bool,
}

/// Summary of a completed remediation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationOutcome {
    pub namespace: String,
    pub deployment: String,
    pub container: String,
    pub pod_name: String,
    pub factor: i64,
    pub memory_limit_bytes: u64,
    pub update_attempts: u32,
    pub ready_wait_millis: u64,
}
