//! Library for the heal probe
//!
//! This crate provides the core functionality for:
//! - Address discovery for a service and its backing pods
//! - Pod memory usage reads from the metrics API
//! - Out-of-memory restart pattern classification
//! - Memory limit remediation of the owning deployment
//! - Health checks and observability

pub mod anomaly;
pub mod cluster;
pub mod collector;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod remediation;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use anomaly::RestartClassifier;
pub use cluster::{ClusterApi, KubeCluster, KubeMetrics, MetricsSource};
pub use collector::{collect_addresses, read_memory};
pub use error::{ClusterError, MetricsError, RemediationError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ProbeMetrics, StructuredLogger};
pub use remediation::{RemediationApplier, RemediationSettings, RetryPolicy};
