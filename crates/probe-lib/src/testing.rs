//! In-memory cluster and metrics fakes for tests
//!
//! Enabled for this crate's unit tests and, through the `testing` feature,
//! for integration tests of dependent crates.

use crate::cluster::{ClusterApi, MetricsSource};
use crate::error::ClusterError;
use crate::models::PodMetrics;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, Pod, PodSpec, PodStatus, PodTemplateSpec, ResourceRequirements, Service,
    ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// When the fake deployment reports ready
#[derive(Debug, Clone, Copy)]
enum Readiness {
    /// Ready on the n-th check (1-based)
    AfterChecks(u32),
    Never,
}

#[derive(Debug)]
struct ClusterState {
    service: Option<Service>,
    pods: Vec<Pod>,
    pod_error: Option<String>,
    deployment: Option<Deployment>,
    conflicts_remaining: u32,
    update_error: Option<String>,
    readiness: Readiness,
    update_attempts: u32,
    successful_updates: u32,
    ready_checks: u32,
    last_selector: Option<String>,
}

/// Scriptable `ClusterApi` holding one service, its pods and one deployment
#[derive(Debug)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClusterState {
                service: None,
                pods: Vec::new(),
                pod_error: None,
                deployment: None,
                conflicts_remaining: 0,
                update_error: None,
                readiness: Readiness::AfterChecks(1),
                update_attempts: 0,
                successful_updates: 0,
                ready_checks: 0,
                last_selector: None,
            }),
        }
    }

    fn with_state(self, f: impl FnOnce(&mut ClusterState)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn with_service(self, service: Service) -> Self {
        self.with_state(|s| s.service = Some(service))
    }

    pub fn with_pods(self, pods: Vec<Pod>) -> Self {
        self.with_state(|s| s.pods = pods)
    }

    pub fn fail_pod_listing(self, message: &str) -> Self {
        let message = message.to_string();
        self.with_state(|s| s.pod_error = Some(message))
    }

    pub fn with_deployment(self, deployment: Deployment) -> Self {
        self.with_state(|s| s.deployment = Some(deployment))
    }

    /// Reject the next `times` updates with a write conflict
    pub fn conflict_times(self, times: u32) -> Self {
        self.with_state(|s| s.conflicts_remaining = times)
    }

    /// Reject every update with a non-conflict error
    pub fn fail_updates(self, message: &str) -> Self {
        let message = message.to_string();
        self.with_state(|s| s.update_error = Some(message))
    }

    pub fn ready_after(self, checks: u32) -> Self {
        self.with_state(|s| s.readiness = Readiness::AfterChecks(checks))
    }

    pub fn never_ready(self) -> Self {
        self.with_state(|s| s.readiness = Readiness::Never)
    }

    pub fn deployment(&self) -> Option<Deployment> {
        self.state.lock().unwrap().deployment.clone()
    }

    /// Replace calls received, including rejected ones
    pub fn update_attempts(&self) -> u32 {
        self.state.lock().unwrap().update_attempts
    }

    pub fn successful_updates(&self) -> u32 {
        self.state.lock().unwrap().successful_updates
    }

    pub fn ready_checks(&self) -> u32 {
        self.state.lock().unwrap().ready_checks
    }

    pub fn last_selector(&self) -> Option<String> {
        self.state.lock().unwrap().last_selector.clone()
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_service(&self, _namespace: &str, name: &str) -> Result<Service, ClusterError> {
        self.state
            .lock()
            .unwrap()
            .service
            .clone()
            .filter(|s| s.metadata.name.as_deref() == Some(name))
            .ok_or_else(|| ClusterError::NotFound(format!("services \"{}\" not found", name)))
    }

    async fn list_pods(&self, _namespace: &str, selector: &str) -> Result<Vec<Pod>, ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.last_selector = Some(selector.to_string());
        match &state.pod_error {
            Some(message) => Err(ClusterError::InvalidObject(message.clone())),
            None => Ok(state.pods.clone()),
        }
    }

    async fn get_deployment(
        &self,
        _namespace: &str,
        name: &str,
    ) -> Result<Deployment, ClusterError> {
        self.state
            .lock()
            .unwrap()
            .deployment
            .clone()
            .filter(|d| d.metadata.name.as_deref() == Some(name))
            .ok_or_else(|| ClusterError::NotFound(format!("deployments \"{}\" not found", name)))
    }

    async fn replace_deployment(
        &self,
        _namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.update_attempts += 1;

        if state.conflicts_remaining > 0 {
            state.conflicts_remaining -= 1;
            return Err(ClusterError::Conflict(
                "the object has been modified; please apply your changes to the latest version"
                    .to_string(),
            ));
        }
        if let Some(message) = &state.update_error {
            return Err(ClusterError::InvalidObject(message.clone()));
        }

        state.successful_updates += 1;
        state.deployment = Some(deployment.clone());
        Ok(deployment.clone())
    }

    async fn deployment_ready(&self, _namespace: &str, _name: &str) -> Result<bool, ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.ready_checks += 1;
        Ok(match state.readiness {
            Readiness::AfterChecks(n) => state.ready_checks >= n,
            Readiness::Never => false,
        })
    }
}

/// `MetricsSource` serving fixed pod metrics
#[derive(Debug, Default)]
pub struct FakeMetrics {
    pods: HashMap<String, PodMetrics>,
}

impl FakeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pod(mut self, pod: &str, metrics: PodMetrics) -> Self {
        self.pods.insert(pod.to_string(), metrics);
        self
    }
}

#[async_trait]
impl MetricsSource for FakeMetrics {
    async fn pod_metrics(&self, _namespace: &str, pod: &str) -> Result<PodMetrics, ClusterError> {
        self.pods
            .get(pod)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("podmetrics \"{}\" not found", pod)))
    }
}

/// A service with a cluster IP and an optional selector
pub fn service(name: &str, cluster_ip: &str, selector: &[(&str, &str)]) -> Service {
    let selector: BTreeMap<String, String> = selector
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some(cluster_ip.to_string()),
            selector: (!selector.is_empty()).then_some(selector),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn pod_with_ip(name: &str, ip: Option<&str>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: None,
        status: Some(PodStatus {
            pod_ip: ip.map(str::to_string),
            ..Default::default()
        }),
    }
}

/// A single-container deployment named after its container
pub fn deployment_with_limits(name: &str, limits: &[(&str, &str)]) -> Deployment {
    let limits: BTreeMap<String, Quantity> = limits
        .iter()
        .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
        .collect();

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            generation: Some(1),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: name.to_string(),
                        resources: Some(ResourceRequirements {
                            limits: (!limits.is_empty()).then_some(limits),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}
