//! Memory limit remediation for a deployment
//!
//! Raises the memory limit of one container slot of the watched deployment
//! to `baseline × factor`, retrying the fetch-modify-submit sequence on
//! write conflicts, then waits (bounded and cancellable) for the rollout to
//! become ready.

use super::retry::{retry_on_conflict, RetryPolicy};
use crate::cluster::ClusterApi;
use crate::error::RemediationError;
use crate::models::{ProbeContext, RemediationOutcome};
use crate::observability::ProbeMetrics;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Baseline memory limit the factor is applied to (170Mi)
pub const DEFAULT_BASELINE_MEMORY_BYTES: u64 = 170 * 1024 * 1024;

/// Factor used when the caller supplies one below 1
pub const DEFAULT_FACTOR: i64 = 2;

/// Compute `baseline × factor`, substituting the default factor for
/// anything below 1
pub fn compute_memory_limit(baseline: u64, factor: i64) -> Result<u64, RemediationError> {
    let factor = effective_factor(factor);
    u64::try_from(factor)
        .ok()
        .and_then(|f| baseline.checked_mul(f))
        .ok_or(RemediationError::LimitOverflow { baseline, factor })
}

pub fn effective_factor(factor: i64) -> i64 {
    if factor < 1 {
        DEFAULT_FACTOR
    } else {
        factor
    }
}

/// Tunables of a remediation run
#[derive(Debug, Clone)]
pub struct RemediationSettings {
    pub baseline_memory_bytes: u64,
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
    pub ready_timeout: Duration,
}

impl Default for RemediationSettings {
    fn default() -> Self {
        Self {
            baseline_memory_bytes: DEFAULT_BASELINE_MEMORY_BYTES,
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_millis(500),
            ready_timeout: Duration::from_secs(600),
        }
    }
}

/// Applies memory limit increases to the context's deployment
pub struct RemediationApplier {
    cluster: Arc<dyn ClusterApi>,
    context: Arc<ProbeContext>,
    settings: RemediationSettings,
    metrics: ProbeMetrics,
}

impl RemediationApplier {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        context: Arc<ProbeContext>,
        settings: RemediationSettings,
    ) -> Self {
        Self {
            cluster,
            context,
            settings,
            metrics: ProbeMetrics::new(),
        }
    }

    pub fn settings(&self) -> &RemediationSettings {
        &self.settings
    }

    /// Raise the memory limit and wait for the deployment to settle
    ///
    /// `pod` is the pod whose restarts triggered the remediation; it is only
    /// carried into logs and the outcome.
    pub async fn apply(
        &self,
        factor: i64,
        pod: &str,
        cancel: &CancellationToken,
    ) -> Result<RemediationOutcome, RemediationError> {
        self.metrics.inc_remediations();

        let result = self.run(factor, pod, cancel).await;
        if let Err(e) = &result {
            self.metrics.inc_remediation_failures();
            error!(
                namespace = %self.context.namespace,
                deployment = %self.context.deployment,
                pod = %pod,
                error = %e,
                "Remediation failed"
            );
        }
        result
    }

    async fn run(
        &self,
        factor: i64,
        pod: &str,
        cancel: &CancellationToken,
    ) -> Result<RemediationOutcome, RemediationError> {
        let factor = effective_factor(factor);
        let limit = compute_memory_limit(self.settings.baseline_memory_bytes, factor)?;

        info!(
            namespace = %self.context.namespace,
            deployment = %self.context.deployment,
            pod = %pod,
            factor,
            memory_limit_bytes = limit,
            "Raising deployment memory limit"
        );

        let (container, attempts) =
            retry_on_conflict(&self.settings.retry, &self.context.deployment, |attempt| {
                self.update_limit(limit, attempt)
            })
            .await?;

        let waited = self.wait_for_ready(cancel).await?;

        Ok(RemediationOutcome {
            namespace: self.context.namespace.clone(),
            deployment: self.context.deployment.clone(),
            container,
            pod_name: pod.to_string(),
            factor,
            memory_limit_bytes: limit,
            update_attempts: attempts,
            ready_wait_millis: waited.as_millis() as u64,
        })
    }

    /// One fetch-modify-submit pass; returns the name of the updated container
    async fn update_limit(&self, limit: u64, attempt: u32) -> Result<String, RemediationError> {
        let deployment_name = &self.context.deployment;

        let mut deployment = self
            .cluster
            .get_deployment(&self.context.namespace, deployment_name)
            .await
            .map_err(|e| RemediationError::Fetch {
                deployment: deployment_name.clone(),
                source: e,
            })?;

        let container = set_memory_limit(&mut deployment, self.context.container_index, limit)
            .ok_or_else(|| RemediationError::ContainerMissing {
                deployment: deployment_name.clone(),
                index: self.context.container_index,
            })?;

        match self
            .cluster
            .replace_deployment(&self.context.namespace, &deployment)
            .await
        {
            Ok(_) => {
                info!(deployment = %deployment_name, attempt, "Deployment updated");
                Ok(container)
            }
            Err(e) => {
                if e.is_conflict() {
                    self.metrics.inc_update_conflicts();
                }
                warn!(deployment = %deployment_name, attempt, error = %e, "Deployment update failed");
                Err(RemediationError::Update {
                    deployment: deployment_name.clone(),
                    source: e,
                })
            }
        }
    }

    /// Poll readiness until it holds, the timeout elapses, or `cancel` fires
    async fn wait_for_ready(&self, cancel: &CancellationToken) -> Result<Duration, RemediationError> {
        let started = Instant::now();
        let deadline = tokio::time::sleep(self.settings.ready_timeout);
        tokio::pin!(deadline);

        loop {
            match self
                .cluster
                .deployment_ready(&self.context.namespace, &self.context.deployment)
                .await
            {
                Ok(true) => {
                    let waited = started.elapsed();
                    self.metrics.observe_ready_wait(waited.as_secs_f64());
                    return Ok(waited);
                }
                Ok(false) => info!(
                    deployment = %self.context.deployment,
                    "Waiting for the pods to be up and running"
                ),
                Err(e) => warn!(
                    deployment = %self.context.deployment,
                    error = %e,
                    "Readiness check failed"
                ),
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(RemediationError::Cancelled {
                        deployment: self.context.deployment.clone(),
                    });
                }
                _ = &mut deadline => {
                    return Err(RemediationError::ReadyTimeout {
                        deployment: self.context.deployment.clone(),
                        waited: started.elapsed(),
                    });
                }
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
    }
}

/// Replace the limits of the container at `index` with only a memory limit
///
/// Any other limit (CPU, ephemeral storage) is dropped. Returns the
/// container's name, or `None` when the slot does not exist.
pub fn set_memory_limit(deployment: &mut Deployment, index: usize, limit: u64) -> Option<String> {
    let container = deployment
        .spec
        .as_mut()?
        .template
        .spec
        .as_mut()?
        .containers
        .get_mut(index)?;

    let mut limits = BTreeMap::new();
    limits.insert("memory".to_string(), Quantity(limit.to_string()));
    container.resources.get_or_insert_with(Default::default).limits = Some(limits);

    Some(container.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{deployment_with_limits, FakeCluster};

    fn context() -> Arc<ProbeContext> {
        Arc::new(ProbeContext::new("kube-system", "kube-dns", "coredns"))
    }

    fn settings() -> RemediationSettings {
        RemediationSettings {
            baseline_memory_bytes: 1000,
            retry: RetryPolicy {
                steps: 5,
                backoff: Duration::from_millis(1),
                factor: 1.0,
            },
            poll_interval: Duration::from_millis(1),
            ready_timeout: Duration::from_secs(5),
        }
    }

    fn applier(cluster: &Arc<FakeCluster>) -> RemediationApplier {
        RemediationApplier::new(cluster.clone(), context(), settings())
    }

    fn memory_limit(deployment: &Deployment) -> Option<String> {
        limits(deployment).and_then(|l| l.get("memory").map(|q| q.0.clone()))
    }

    fn limits(deployment: &Deployment) -> Option<BTreeMap<String, Quantity>> {
        deployment.spec.as_ref()?.template.spec.as_ref()?.containers[0]
            .resources
            .as_ref()?
            .limits
            .clone()
    }

    #[test]
    fn test_factor_below_one_defaults_to_two() {
        assert_eq!(compute_memory_limit(170, 0).unwrap(), 340);
        assert_eq!(compute_memory_limit(170, -5).unwrap(), 340);
    }

    #[test]
    fn test_factor_multiplies_baseline() {
        assert_eq!(compute_memory_limit(170, 3).unwrap(), 510);
        assert_eq!(compute_memory_limit(170, 1).unwrap(), 170);
    }

    #[test]
    fn test_limit_overflow_is_an_error() {
        assert!(matches!(
            compute_memory_limit(u64::MAX, 2),
            Err(RemediationError::LimitOverflow { .. })
        ));
    }

    #[test]
    fn test_set_memory_limit_discards_other_limits() {
        let mut deployment = deployment_with_limits("coredns", &[("cpu", "100m"), ("memory", "170Mi")]);

        let container = set_memory_limit(&mut deployment, 0, 4096);

        assert_eq!(container.as_deref(), Some("coredns"));
        let limits = limits(&deployment).unwrap();
        assert_eq!(limits.len(), 1);
        assert_eq!(limits["memory"].0, "4096");
    }

    #[test]
    fn test_set_memory_limit_missing_slot() {
        let mut deployment = deployment_with_limits("coredns", &[]);
        assert!(set_memory_limit(&mut deployment, 3, 4096).is_none());
    }

    #[tokio::test]
    async fn test_apply_updates_limit_and_waits_for_ready() {
        let cluster = Arc::new(
            FakeCluster::new()
                .with_deployment(deployment_with_limits("coredns", &[("cpu", "100m")]))
                .ready_after(3),
        );

        let outcome = applier(&cluster)
            .apply(3, "coredns-a", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.memory_limit_bytes, 3000);
        assert_eq!(outcome.factor, 3);
        assert_eq!(outcome.container, "coredns");
        assert_eq!(outcome.update_attempts, 1);
        assert_eq!(cluster.successful_updates(), 1);
        assert_eq!(cluster.ready_checks(), 3);

        let stored = cluster.deployment().unwrap();
        assert_eq!(memory_limit(&stored).as_deref(), Some("3000"));
        assert_eq!(limits(&stored).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_conflict_once_then_success_updates_exactly_once() {
        let cluster = Arc::new(
            FakeCluster::new()
                .with_deployment(deployment_with_limits("coredns", &[]))
                .conflict_times(1),
        );

        let outcome = applier(&cluster)
            .apply(0, "coredns-a", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.update_attempts, 2);
        assert_eq!(outcome.factor, DEFAULT_FACTOR);
        assert_eq!(cluster.update_attempts(), 2);
        assert_eq!(cluster.successful_updates(), 1);
        assert_eq!(
            memory_limit(&cluster.deployment().unwrap()).as_deref(),
            Some("2000")
        );
    }

    #[tokio::test]
    async fn test_persistent_conflict_exhausts_retries() {
        let cluster = Arc::new(
            FakeCluster::new()
                .with_deployment(deployment_with_limits("coredns", &[]))
                .conflict_times(u32::MAX),
        );

        let result = applier(&cluster)
            .apply(2, "coredns-a", &CancellationToken::new())
            .await;

        assert!(matches!(
            result,
            Err(RemediationError::RetryExhausted { attempts: 5, .. })
        ));
        assert_eq!(cluster.successful_updates(), 0);
        assert_eq!(cluster.ready_checks(), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_returns_before_any_update() {
        let cluster = Arc::new(FakeCluster::new());

        let result = applier(&cluster)
            .apply(2, "coredns-a", &CancellationToken::new())
            .await;

        match result {
            Err(RemediationError::Fetch { source, .. }) => assert!(source.is_not_found()),
            other => panic!("expected Fetch error, got {:?}", other),
        }
        assert_eq!(cluster.update_attempts(), 0);
    }

    #[tokio::test]
    async fn test_non_conflict_update_error_is_not_retried() {
        let cluster = Arc::new(
            FakeCluster::new()
                .with_deployment(deployment_with_limits("coredns", &[]))
                .fail_updates("rejected"),
        );

        let result = applier(&cluster)
            .apply(2, "coredns-a", &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(RemediationError::Update { .. })));
        assert_eq!(cluster.update_attempts(), 1);
    }

    #[tokio::test]
    async fn test_ready_wait_times_out() {
        let cluster = Arc::new(
            FakeCluster::new()
                .with_deployment(deployment_with_limits("coredns", &[]))
                .never_ready(),
        );
        let mut settings = settings();
        settings.ready_timeout = Duration::from_millis(20);
        let applier = RemediationApplier::new(cluster.clone(), context(), settings);

        let result = applier.apply(2, "coredns-a", &CancellationToken::new()).await;

        assert!(matches!(result, Err(RemediationError::ReadyTimeout { .. })));
        assert_eq!(cluster.successful_updates(), 1);
    }

    #[tokio::test]
    async fn test_ready_wait_is_cancellable() {
        let cluster = Arc::new(
            FakeCluster::new()
                .with_deployment(deployment_with_limits("coredns", &[]))
                .never_ready(),
        );
        let mut settings = settings();
        settings.poll_interval = Duration::from_secs(3600);
        settings.ready_timeout = Duration::from_secs(3600);
        let applier = RemediationApplier::new(cluster.clone(), context(), settings);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = applier.apply(2, "coredns-a", &cancel).await;

        assert!(matches!(result, Err(RemediationError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_missing_container_slot() {
        let cluster = Arc::new(FakeCluster::new().with_deployment(deployment_with_limits("coredns", &[])));
        let applier = RemediationApplier::new(
            cluster.clone(),
            Arc::new(ProbeContext::new("kube-system", "kube-dns", "coredns").with_container_index(2)),
            settings(),
        );

        let result = applier.apply(2, "coredns-a", &CancellationToken::new()).await;

        assert!(matches!(result, Err(RemediationError::ContainerMissing { index: 2, .. })));
        assert_eq!(cluster.update_attempts(), 0);
    }
}
