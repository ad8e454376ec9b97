//! Seams to the Kubernetes API and the resource metrics API
//!
//! The probe talks to the cluster through two traits so the address
//! collector, metrics reader and remediation applier can run against
//! in-memory fakes in tests. `KubeCluster` and `KubeMetrics` are the
//! production implementations backed by a `kube::Client`.

mod kube_api;

pub use kube_api::{KubeCluster, KubeMetrics};

use crate::error::ClusterError;
use crate::models::PodMetrics;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Pod, Service};
use std::collections::BTreeMap;

/// Cluster operations needed by the probe
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError>;

    /// List pods matching a label selector (`k=v,k2=v2`)
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, ClusterError>;

    async fn get_deployment(&self, namespace: &str, name: &str)
        -> Result<Deployment, ClusterError>;

    /// Submit a full replacement of a deployment; fails with
    /// `ClusterError::Conflict` when its resourceVersion is stale
    async fn replace_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClusterError>;

    /// Whether every pod of the deployment is updated and ready
    async fn deployment_ready(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        let deployment = self.get_deployment(namespace, name).await?;
        Ok(rollout_complete(&deployment))
    }
}

/// Source of per-pod resource usage
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn pod_metrics(&self, namespace: &str, pod: &str) -> Result<PodMetrics, ClusterError>;
}

/// Render a service selector as a label selector string
pub fn label_selector(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Rollout check in the manner of `kubectl rollout status`
///
/// The controller must have observed the latest generation, every desired
/// replica must run the new template, no old replicas may linger, and all
/// of them must be ready and available.
pub fn rollout_complete(deployment: &Deployment) -> bool {
    let Some(status) = deployment.status.as_ref() else {
        return false;
    };

    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let generation = deployment.metadata.generation.unwrap_or(0);
    let observed = status.observed_generation.unwrap_or(0);

    let updated = status.updated_replicas.unwrap_or(0);
    let total = status.replicas.unwrap_or(0);
    let ready = status.ready_replicas.unwrap_or(0);
    let available = status.available_replicas.unwrap_or(0);

    observed >= generation
        && updated >= desired
        && total <= updated
        && ready >= desired
        && available >= updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn deployment(generation: i64, replicas: i32, status: DeploymentStatus) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some("coredns".to_string()),
                generation: Some(generation),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                ..Default::default()
            }),
            status: Some(status),
        }
    }

    fn status(observed: i64, total: i32, updated: i32, ready: i32, available: i32) -> DeploymentStatus {
        DeploymentStatus {
            observed_generation: Some(observed),
            replicas: Some(total),
            updated_replicas: Some(updated),
            ready_replicas: Some(ready),
            available_replicas: Some(available),
            ..Default::default()
        }
    }

    #[test]
    fn test_label_selector_is_sorted_and_joined() {
        let mut selector = BTreeMap::new();
        selector.insert("k8s-app".to_string(), "kube-dns".to_string());
        selector.insert("app".to_string(), "dns".to_string());

        assert_eq!(label_selector(&selector), "app=dns,k8s-app=kube-dns");
        assert_eq!(label_selector(&BTreeMap::new()), "");
    }

    #[test]
    fn test_rollout_complete_when_all_replicas_ready() {
        let d = deployment(3, 2, status(3, 2, 2, 2, 2));
        assert!(rollout_complete(&d));
    }

    #[test]
    fn test_rollout_incomplete_when_generation_not_observed() {
        let d = deployment(4, 2, status(3, 2, 2, 2, 2));
        assert!(!rollout_complete(&d));
    }

    #[test]
    fn test_rollout_incomplete_while_old_replicas_terminate() {
        let d = deployment(4, 2, status(4, 3, 2, 2, 2));
        assert!(!rollout_complete(&d));
    }

    #[test]
    fn test_rollout_incomplete_when_pods_not_ready() {
        let d = deployment(4, 2, status(4, 2, 2, 1, 1));
        assert!(!rollout_complete(&d));
    }

    #[test]
    fn test_rollout_incomplete_without_status() {
        let mut d = deployment(1, 1, status(1, 1, 1, 1, 1));
        d.status = None;
        assert!(!rollout_complete(&d));
    }
}
