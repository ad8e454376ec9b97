//! `kube`-backed implementations of the cluster seams

use super::{ClusterApi, MetricsSource};
use crate::error::ClusterError;
use crate::models::PodMetrics;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{ListParams, PostParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Api, Client};
use tracing::debug;

/// Cluster access through the Kubernetes API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(services.get(name).await?)
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, ClusterError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods.list(&ListParams::default().labels(selector)).await?;
        debug!(namespace = %namespace, selector = %selector, count = list.items.len(), "Listed pods");
        Ok(list.items)
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Deployment, ClusterError> {
        Ok(self.deployments(namespace).get(name).await?)
    }

    async fn replace_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClusterError> {
        let name = deployment
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ClusterError::InvalidObject("deployment has no name".to_string()))?;

        Ok(self
            .deployments(namespace)
            .replace(name, &PostParams::default(), deployment)
            .await?)
    }
}

/// Pod usage from the `metrics.k8s.io` aggregated API
#[derive(Clone)]
pub struct KubeMetrics {
    client: Client,
    resource: ApiResource,
}

impl KubeMetrics {
    pub fn new(client: Client) -> Self {
        let gvk = GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "PodMetrics");
        Self {
            client,
            resource: ApiResource::from_gvk_with_plural(&gvk, "pods"),
        }
    }
}

#[async_trait]
impl MetricsSource for KubeMetrics {
    async fn pod_metrics(&self, namespace: &str, pod: &str) -> Result<PodMetrics, ClusterError> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &self.resource);
        let object = api.get(pod).await?;

        serde_json::from_value(object.data)
            .map_err(|e| ClusterError::InvalidObject(format!("pod metrics for {}: {}", pod, e)))
    }
}
