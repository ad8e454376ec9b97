//! Service and pod address discovery
//!
//! Resolves the addresses that should be reachable for the watched
//! workload: the service's cluster IPs and the IPs of the pods it selects.
//! Both lookups are single best-effort passes; a failed lookup leaves its
//! category out of the result and records why.

use crate::cluster::{label_selector, ClusterApi};
use crate::models::{AddressGroup, ProbeContext, POD_IPS, SERVICE_IPS};
use k8s_openapi::api::core::v1::Service;
use tracing::{debug, error, info};

/// Collect service and pod addresses for the context's service
pub async fn collect_addresses(context: &ProbeContext, cluster: &dyn ClusterApi) -> AddressGroup {
    let mut group = AddressGroup::new();

    let service = match cluster
        .get_service(&context.namespace, &context.service_name)
        .await
    {
        Ok(service) => {
            group.extend(SERVICE_IPS, service_addresses(&service));
            Some(service)
        }
        Err(e) => {
            error!(
                namespace = %context.namespace,
                service = %context.service_name,
                error = %e,
                "Failed to look up service"
            );
            group.mark_unresolved(SERVICE_IPS, e.to_string());
            None
        }
    };

    match service {
        Some(service) => collect_pod_addresses(context, cluster, &service, &mut group).await,
        None => group.mark_unresolved(POD_IPS, "service lookup failed, selector unknown"),
    }

    info!(
        namespace = %context.namespace,
        service = %context.service_name,
        addresses = group.len(),
        complete = group.is_complete(),
        "Collected workload addresses"
    );

    group
}

async fn collect_pod_addresses(
    context: &ProbeContext,
    cluster: &dyn ClusterApi,
    service: &Service,
    group: &mut AddressGroup,
) {
    let selector = service
        .spec
        .as_ref()
        .and_then(|s| s.selector.as_ref())
        .filter(|s| !s.is_empty());

    // Without a selector the service manages no pods of its own.
    let Some(selector) = selector else {
        debug!(service = %context.service_name, "Service has no selector");
        group.extend(POD_IPS, Vec::new());
        return;
    };

    match cluster
        .list_pods(&context.namespace, &label_selector(selector))
        .await
    {
        Ok(pods) => {
            let mut ips = Vec::with_capacity(pods.len());
            for pod in &pods {
                match pod.status.as_ref().and_then(|s| s.pod_ip.clone()) {
                    Some(ip) => ips.push(ip),
                    None => debug!(
                        pod = pod.metadata.name.as_deref().unwrap_or_default(),
                        "Pod has no IP assigned yet"
                    ),
                }
            }
            group.extend(POD_IPS, ips);
        }
        Err(e) => {
            error!(
                namespace = %context.namespace,
                service = %context.service_name,
                error = %e,
                "Failed to list pods backing service"
            );
            group.mark_unresolved(POD_IPS, e.to_string());
        }
    }
}

/// Cluster IPs of a service, dual-stack aware
fn service_addresses(service: &Service) -> Vec<String> {
    let Some(spec) = service.spec.as_ref() else {
        return Vec::new();
    };

    match spec.cluster_ips.as_ref().filter(|ips| !ips.is_empty()) {
        Some(ips) => ips.clone(),
        None => spec.cluster_ip.iter().cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{pod_with_ip, service, FakeCluster};

    fn context() -> ProbeContext {
        ProbeContext::new("kube-system", "kube-dns", "coredns")
    }

    #[tokio::test]
    async fn test_collects_service_and_pod_ips() {
        let cluster = FakeCluster::new()
            .with_service(service("kube-dns", "10.96.0.10", &[("k8s-app", "kube-dns")]))
            .with_pods(vec![
                pod_with_ip("coredns-a", Some("10.244.0.2")),
                pod_with_ip("coredns-b", Some("10.244.0.3")),
            ]);

        let group = collect_addresses(&context(), &cluster).await;

        assert_eq!(group.service_ips(), Some(&["10.96.0.10".to_string()][..]));
        assert_eq!(
            group.pod_ips(),
            Some(&["10.244.0.2".to_string(), "10.244.0.3".to_string()][..])
        );
        assert!(group.is_complete());
        assert_eq!(cluster.last_selector().as_deref(), Some("k8s-app=kube-dns"));
    }

    #[tokio::test]
    async fn test_zero_backing_pods_is_not_a_failure() {
        let cluster = FakeCluster::new()
            .with_service(service("kube-dns", "10.96.0.10", &[("k8s-app", "kube-dns")]));

        let group = collect_addresses(&context(), &cluster).await;

        assert_eq!(group.service_ips().map(|ips| ips.len()), Some(1));
        assert_eq!(group.pod_ips(), Some(&[][..]));
        assert!(group.is_complete());
    }

    #[tokio::test]
    async fn test_pods_without_ip_are_skipped() {
        let cluster = FakeCluster::new()
            .with_service(service("kube-dns", "10.96.0.10", &[("k8s-app", "kube-dns")]))
            .with_pods(vec![
                pod_with_ip("coredns-a", None),
                pod_with_ip("coredns-b", Some("10.244.0.3")),
            ]);

        let group = collect_addresses(&context(), &cluster).await;

        assert_eq!(group.pod_ips(), Some(&["10.244.0.3".to_string()][..]));
    }

    #[tokio::test]
    async fn test_missing_service_leaves_both_categories_unresolved() {
        let cluster = FakeCluster::new();

        let group = collect_addresses(&context(), &cluster).await;

        assert!(group.service_ips().is_none());
        assert!(group.pod_ips().is_none());
        assert!(group.unresolved.contains_key(SERVICE_IPS));
        assert!(group.unresolved.contains_key(POD_IPS));
    }

    #[tokio::test]
    async fn test_pod_listing_failure_keeps_service_ips() {
        let cluster = FakeCluster::new()
            .with_service(service("kube-dns", "10.96.0.10", &[("k8s-app", "kube-dns")]))
            .fail_pod_listing("boom");

        let group = collect_addresses(&context(), &cluster).await;

        assert_eq!(group.service_ips().map(|ips| ips.len()), Some(1));
        assert!(group.pod_ips().is_none());
        assert!(group.unresolved.contains_key(POD_IPS));
        assert!(!group.unresolved.contains_key(SERVICE_IPS));
    }

    #[tokio::test]
    async fn test_service_without_selector_has_empty_pod_ips() {
        let cluster = FakeCluster::new().with_service(service("kube-dns", "10.96.0.10", &[]));

        let group = collect_addresses(&context(), &cluster).await;

        assert_eq!(group.pod_ips(), Some(&[][..]));
        assert!(cluster.last_selector().is_none());
    }

    #[tokio::test]
    async fn test_dual_stack_service_reports_every_cluster_ip() {
        let mut dns = service("kube-dns", "10.96.0.10", &[("k8s-app", "kube-dns")]);
        dns.spec.as_mut().unwrap().cluster_ips =
            Some(vec!["10.96.0.10".to_string(), "fd00:10:96::a".to_string()]);
        let cluster = FakeCluster::new().with_service(dns);

        let group = collect_addresses(&context(), &cluster).await;

        assert_eq!(
            group.service_ips(),
            Some(&["10.96.0.10".to_string(), "fd00:10:96::a".to_string()][..])
        );
    }

    #[tokio::test]
    async fn test_headless_service_reports_none_address() {
        let mut dns = service("kube-dns", "None", &[("k8s-app", "kube-dns")]);
        dns.spec.as_mut().unwrap().cluster_ips = Some(vec!["None".to_string()]);
        let cluster = FakeCluster::new()
            .with_service(dns)
            .with_pods(vec![pod_with_ip("coredns-a", Some("10.244.0.2"))]);

        let group = collect_addresses(&context(), &cluster).await;

        assert_eq!(group.service_ips(), Some(&["None".to_string()][..]));
        assert_eq!(group.pod_ips(), Some(&["10.244.0.2".to_string()][..]));
    }

    #[tokio::test]
    async fn test_empty_cluster_ips_falls_back_to_cluster_ip() {
        let mut dns = service("kube-dns", "10.96.0.10", &[]);
        dns.spec.as_mut().unwrap().cluster_ips = Some(Vec::new());
        let cluster = FakeCluster::new().with_service(dns);

        let group = collect_addresses(&context(), &cluster).await;

        assert_eq!(group.service_ips(), Some(&["10.96.0.10".to_string()][..]));
    }
}
