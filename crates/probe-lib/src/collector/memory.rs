//! Pod memory usage reads from the metrics API

use super::quantity::parse_bytes;
use crate::cluster::MetricsSource;
use crate::error::MetricsError;
use crate::models::{MemoryReading, ProbeContext};
use tracing::{debug, error, warn};

/// Read the memory usage of a pod in the context's namespace
///
/// Containers are visited in the order the metrics API reports them and the
/// first one with a parsable memory value wins; usage is not summed across
/// containers.
pub async fn read_memory(
    context: &ProbeContext,
    source: &dyn MetricsSource,
    pod: &str,
) -> Result<MemoryReading, MetricsError> {
    let metrics = source
        .pod_metrics(&context.namespace, pod)
        .await
        .map_err(|e| {
            error!(pod = %pod, namespace = %context.namespace, error = %e, "Error getting metrics for pod");
            MetricsError::Unavailable {
                pod: pod.to_string(),
                source: e,
            }
        })?;

    let mut parse_failure = None;

    for container in &metrics.containers {
        let Some(raw) = container.memory() else {
            debug!(pod = %pod, container = %container.name, "Container reports no memory usage");
            continue;
        };

        match parse_bytes(raw) {
            Ok(bytes) => {
                return Ok(MemoryReading {
                    pod_name: pod.to_string(),
                    namespace: context.namespace.clone(),
                    container: container.name.clone(),
                    memory_usage_bytes: bytes,
                    timestamp: metrics.timestamp,
                    window: metrics.window.clone(),
                });
            }
            Err(e) => {
                warn!(
                    pod = %pod,
                    container = %container.name,
                    value = %raw,
                    error = %e,
                    "Error getting the memory usage of container"
                );
                parse_failure = Some(MetricsError::InvalidQuantity {
                    pod: pod.to_string(),
                    value: raw.to_string(),
                    source: e,
                });
            }
        }
    }

    Err(parse_failure.unwrap_or_else(|| MetricsError::NoContainerUsage {
        pod: pod.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClusterError;
    use crate::models::{ContainerUsage, PodMetrics};
    use crate::testing::FakeMetrics;

    fn context() -> ProbeContext {
        ProbeContext::new("kube-system", "kube-dns", "coredns")
    }

    fn usage(name: &str, memory: Option<&str>) -> ContainerUsage {
        let mut container = ContainerUsage {
            name: name.to_string(),
            ..Default::default()
        };
        container.usage.insert("cpu".to_string(), "3m".to_string());
        if let Some(memory) = memory {
            container.usage.insert("memory".to_string(), memory.to_string());
        }
        container
    }

    #[tokio::test]
    async fn test_reads_first_container_memory() {
        let metrics = FakeMetrics::new().with_pod(
            "coredns-a",
            PodMetrics {
                containers: vec![usage("coredns", Some("20092Ki")), usage("sidecar", Some("1Mi"))],
                ..Default::default()
            },
        );

        let reading = read_memory(&context(), &metrics, "coredns-a").await.unwrap();

        assert_eq!(reading.container, "coredns");
        assert_eq!(reading.memory_usage_bytes, 20_574_208);
        assert_eq!(reading.namespace, "kube-system");
    }

    #[tokio::test]
    async fn test_skips_unparsable_container() {
        let metrics = FakeMetrics::new().with_pod(
            "coredns-a",
            PodMetrics {
                containers: vec![usage("broken", Some("lots")), usage("coredns", Some("64Mi"))],
                ..Default::default()
            },
        );

        let reading = read_memory(&context(), &metrics, "coredns-a").await.unwrap();

        assert_eq!(reading.container, "coredns");
        assert_eq!(reading.memory_usage_bytes, 64 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_no_container_usage_is_an_error_not_a_panic() {
        let metrics = FakeMetrics::new().with_pod("coredns-a", PodMetrics::default());

        let result = read_memory(&context(), &metrics, "coredns-a").await;

        assert!(matches!(result, Err(MetricsError::NoContainerUsage { .. })));
    }

    #[tokio::test]
    async fn test_container_without_memory_key_is_no_usage() {
        let metrics = FakeMetrics::new().with_pod(
            "coredns-a",
            PodMetrics {
                containers: vec![usage("coredns", None)],
                ..Default::default()
            },
        );

        let result = read_memory(&context(), &metrics, "coredns-a").await;

        assert!(matches!(result, Err(MetricsError::NoContainerUsage { .. })));
    }

    #[tokio::test]
    async fn test_only_unparsable_values_report_invalid_quantity() {
        let metrics = FakeMetrics::new().with_pod(
            "coredns-a",
            PodMetrics {
                containers: vec![usage("coredns", Some("lots"))],
                ..Default::default()
            },
        );

        let result = read_memory(&context(), &metrics, "coredns-a").await;

        match result {
            Err(MetricsError::InvalidQuantity { value, .. }) => assert_eq!(value, "lots"),
            other => panic!("expected InvalidQuantity, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_pod_is_unavailable() {
        let metrics = FakeMetrics::new();

        let result = read_memory(&context(), &metrics, "missing").await;

        match result {
            Err(MetricsError::Unavailable { source, .. }) => {
                assert!(matches!(source, ClusterError::NotFound(_)))
            }
            other => panic!("expected Unavailable, got {:?}", other),
        }
    }
}
