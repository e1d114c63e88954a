//! Service mutations for Memcached databases.
//!
//! Two services are managed:
//! - **Database Service**: client access to Memcached, shaped by `spec.serviceTemplate`
//! - **Stats Service**: exposes the Prometheus exporter when monitoring is enabled
//!
//! The functions here take the live Service (or an empty one carrying only
//! name and namespace) and return it with the managed fields set. Everything
//! else on the object is left as the API server returned it.

use k8s_openapi::api::core::v1::Service;

use crate::crd::Memcached;
use crate::resources::common::{
    ensure_owner_reference, offshoot_selectors, owner_reference, service_labels,
    stats_service_labels,
};
use crate::resources::ports::{
    apply_port_overrides, default_db_port, exporter_port, merge_service_ports,
};

/// `externalTrafficPolicy` the API server assigns when none is given
const DEFAULT_TRAFFIC_POLICY: &str = "Cluster";

/// Set the managed fields of the database Service.
pub fn mutate_database_service(mut svc: Service, resource: &Memcached) -> Service {
    let template = &resource.spec.service_template;

    ensure_owner_reference(&mut svc.metadata, owner_reference(resource));
    svc.metadata.labels = Some(service_labels(resource));
    svc.metadata.annotations = non_empty(template.metadata.annotations.clone());

    let spec = svc.spec.get_or_insert_with(Default::default);
    spec.selector = Some(offshoot_selectors(resource));

    let current = spec.ports.take().unwrap_or_default();
    let ports = merge_service_ports(&current, vec![default_db_port()]);
    spec.ports = Some(apply_port_overrides(ports, &template.spec.ports));

    if let Some(cluster_ip) = template.spec.cluster_ip.as_ref().filter(|ip| !ip.is_empty()) {
        spec.cluster_ip = Some(cluster_ip.clone());
    }
    if let Some(type_) = template.spec.type_.as_ref().filter(|t| !t.is_empty()) {
        spec.type_ = Some(type_.clone());
    }
    spec.external_ips = non_empty(template.spec.external_ips.clone());
    spec.load_balancer_ip = template
        .spec
        .load_balancer_ip
        .clone()
        .filter(|ip| !ip.is_empty());
    spec.load_balancer_source_ranges = non_empty(template.spec.load_balancer_source_ranges.clone());
    spec.external_traffic_policy = external_traffic_policy(
        template.spec.external_traffic_policy.as_deref(),
        spec.type_.as_deref(),
    );
    if let Some(port) = template.spec.health_check_node_port.filter(|p| *p > 0) {
        spec.health_check_node_port = Some(port);
    }

    svc
}

/// Set the managed fields of the stats Service.
pub fn mutate_stats_service(mut svc: Service, resource: &Memcached) -> Service {
    ensure_owner_reference(&mut svc.metadata, owner_reference(resource));
    svc.metadata.labels = Some(stats_service_labels(resource));

    let spec = svc.spec.get_or_insert_with(Default::default);
    spec.selector = Some(offshoot_selectors(resource));

    let current = spec.ports.take().unwrap_or_default();
    spec.ports = Some(merge_service_ports(
        &current,
        vec![exporter_port(resource.exporter_port())],
    ));

    svc
}

/// Policy to write for a Service of type `service_type`.
///
/// An unset policy on a NodePort or LoadBalancer Service is written as the
/// API server default, so dropping `Local` from the template reverts it.
fn external_traffic_policy(template: Option<&str>, service_type: Option<&str>) -> Option<String> {
    match template.filter(|p| !p.is_empty()) {
        Some(policy) => Some(policy.to_string()),
        None if matches!(service_type, Some("NodePort" | "LoadBalancer")) => {
            Some(DEFAULT_TRAFFIC_POLICY.to_string())
        }
        None => None,
    }
}

/// Map an empty collection to `None`, the way the API server omits it.
fn non_empty<C>(collection: C) -> Option<C>
where
    C: IntoIterator + Clone,
{
    if collection.clone().into_iter().next().is_none() {
        None
    } else {
        Some(collection)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap
)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use crate::crd::{
        AgentSpec, AgentType, DEFAULT_DB_PORT, LABEL_DATABASE_NAME, LABEL_ROLE, MemcachedSpec,
        ServicePortOverride,
    };

    fn test_resource(name: &str) -> Memcached {
        Memcached {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                uid: Some("test-uid".to_string()),
                ..Default::default()
            },
            spec: MemcachedSpec::default(),
            status: None,
        }
    }

    fn empty_service(name: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_database_service_defaults() {
        let resource = test_resource("memcd");
        let svc = mutate_database_service(empty_service("memcd"), &resource);

        assert_eq!(svc.metadata.name, Some("memcd".to_string()));
        assert_eq!(svc.metadata.annotations, None);
        assert_eq!(svc.metadata.owner_references.as_ref().unwrap().len(), 1);
        assert_eq!(
            svc.metadata.labels.as_ref().unwrap().get(LABEL_DATABASE_NAME),
            Some(&"memcd".to_string())
        );

        let spec = svc.spec.unwrap();
        assert_eq!(spec.type_, None);
        assert_eq!(spec.cluster_ip, None);
        let ports = spec.ports.unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].port, DEFAULT_DB_PORT);
        assert_eq!(ports[0].name.as_deref(), Some("db"));
    }

    #[test]
    fn test_database_service_applies_template() {
        let mut resource = test_resource("memcd");
        let template = &mut resource.spec.service_template;
        template
            .metadata
            .annotations
            .insert("lb".to_string(), "internal".to_string());
        template.spec.type_ = Some("LoadBalancer".to_string());
        template.spec.cluster_ip = Some("10.96.0.20".to_string());
        template.spec.external_ips = vec!["192.0.2.1".to_string()];
        template.spec.load_balancer_ip = Some("198.51.100.7".to_string());
        template.spec.load_balancer_source_ranges = vec!["10.0.0.0/8".to_string()];
        template.spec.external_traffic_policy = Some("Local".to_string());
        template.spec.health_check_node_port = Some(31500);
        template.spec.ports = vec![ServicePortOverride {
            name: "db".to_string(),
            port: None,
            node_port: Some(30011),
        }];

        let svc = mutate_database_service(empty_service("memcd"), &resource);
        assert_eq!(
            svc.metadata.annotations.as_ref().unwrap().get("lb"),
            Some(&"internal".to_string())
        );

        let spec = svc.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("LoadBalancer"));
        assert_eq!(spec.cluster_ip.as_deref(), Some("10.96.0.20"));
        assert_eq!(spec.external_ips, Some(vec!["192.0.2.1".to_string()]));
        assert_eq!(spec.load_balancer_ip.as_deref(), Some("198.51.100.7"));
        assert_eq!(
            spec.load_balancer_source_ranges,
            Some(vec!["10.0.0.0/8".to_string()])
        );
        assert_eq!(spec.external_traffic_policy.as_deref(), Some("Local"));
        assert_eq!(spec.health_check_node_port, Some(31500));
        assert_eq!(spec.ports.unwrap()[0].node_port, Some(30011));
    }

    #[test]
    fn test_database_service_preserves_unmanaged_fields() {
        let resource = test_resource("memcd");
        let mut live = mutate_database_service(empty_service("memcd"), &resource);
        live.metadata.resource_version = Some("42".to_string());
        let spec = live.spec.as_mut().unwrap();
        spec.cluster_ip = Some("10.96.0.31".to_string());
        spec.type_ = Some("NodePort".to_string());
        spec.session_affinity = Some("None".to_string());
        spec.external_traffic_policy = Some("Cluster".to_string());
        spec.ports.as_mut().unwrap()[0].node_port = Some(30999);

        let svc = mutate_database_service(live.clone(), &resource);
        assert_eq!(svc, live);
    }

    #[test]
    fn test_traffic_policy_reverts_to_server_default() {
        let mut resource = test_resource("memcd");
        resource.spec.service_template.spec.type_ = Some("NodePort".to_string());
        resource.spec.service_template.spec.external_traffic_policy = Some("Local".to_string());
        let live = mutate_database_service(empty_service("memcd"), &resource);
        assert_eq!(
            live.spec.as_ref().unwrap().external_traffic_policy.as_deref(),
            Some("Local")
        );

        resource.spec.service_template.spec.external_traffic_policy = None;
        let svc = mutate_database_service(live, &resource);
        assert_eq!(
            svc.spec.unwrap().external_traffic_policy.as_deref(),
            Some("Cluster")
        );
    }

    #[test]
    fn test_traffic_policy_cleared_for_cluster_ip() {
        let resource = test_resource("memcd");
        let mut live = mutate_database_service(empty_service("memcd"), &resource);
        let spec = live.spec.as_mut().unwrap();
        spec.type_ = Some("ClusterIP".to_string());
        spec.external_traffic_policy = Some("Local".to_string());

        let svc = mutate_database_service(live, &resource);
        assert_eq!(svc.spec.unwrap().external_traffic_policy, None);
    }

    #[test]
    fn test_database_service_replaces_foreign_ports() {
        let resource = test_resource("memcd");
        let mut live = empty_service("memcd");
        live.spec = Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: 80,
                ..Default::default()
            }]),
            ..Default::default()
        });

        let svc = mutate_database_service(live, &resource);
        let ports = svc.spec.unwrap().ports.unwrap();
        assert_eq!(ports, vec![default_db_port()]);
    }

    #[test]
    fn test_stats_service() {
        let mut resource = test_resource("memcd");
        let mut monitor = AgentSpec {
            agent: Some(AgentType::PrometheusBuiltin),
            ..Default::default()
        };
        monitor.prometheus.exporter.port = 9150;
        resource.spec.monitor = Some(monitor);

        let svc = mutate_stats_service(empty_service("memcd-stats"), &resource);
        let labels = svc.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get(LABEL_ROLE), Some(&"stats".to_string()));

        let spec = svc.spec.unwrap();
        assert_eq!(spec.selector, Some(offshoot_selectors(&resource)));
        let ports = spec.ports.unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].port, 9150);
        assert_eq!(ports[0].name.as_deref(), Some("prom-http"));
    }

    #[test]
    fn test_stats_service_ignores_template() {
        let mut resource = test_resource("memcd");
        resource.spec.service_template.spec.type_ = Some("LoadBalancer".to_string());
        let svc = mutate_stats_service(empty_service("memcd-stats"), &resource);
        assert_eq!(svc.spec.unwrap().type_, None);
    }
}
