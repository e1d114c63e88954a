// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Unit tests for memcached-operator.
//!
//! These tests run without a Kubernetes cluster and test individual
//! components in isolation.

#[path = "../common/mod.rs"]
mod common;

mod crd_tests {
    use memcached_operator::crd::{
        AgentType, Condition, DEFAULT_EXPORTER_PORT, Memcached, MemcachedPhase, MonitoringVendor,
    };
    use serde_json::json;

    #[test]
    fn test_phase_display() {
        assert_eq!(MemcachedPhase::Pending.to_string(), "Pending");
        assert_eq!(MemcachedPhase::Running.to_string(), "Running");
        assert_eq!(MemcachedPhase::Failed.to_string(), "Failed");
    }

    #[test]
    fn test_phase_default() {
        assert_eq!(MemcachedPhase::default(), MemcachedPhase::Pending);
    }

    #[test]
    fn test_condition_ready() {
        let condition = Condition::ready(true, "Reconciled", "Services ready", Some(1));
        assert_eq!(condition.r#type, "Ready");
        assert_eq!(condition.status, "True");
        assert_eq!(condition.reason, "Reconciled");
        assert_eq!(condition.message, "Services ready");
        assert_eq!(condition.observed_generation, Some(1));
    }

    #[test]
    fn test_condition_services_not_ready() {
        let condition = Condition::services_ready(false, "ReconcileFailed", "conflict", None);
        assert_eq!(condition.r#type, "ServicesReady");
        assert_eq!(condition.status, "False");
    }

    #[test]
    fn test_deserialize_full_resource() {
        let resource: Memcached = serde_json::from_value(json!({
            "apiVersion": "kubedb.com/v1alpha1",
            "kind": "Memcached",
            "metadata": {"name": "memcd", "namespace": "demo"},
            "spec": {
                "version": "1.5.4",
                "replicas": 3,
                "serviceTemplate": {
                    "metadata": {"annotations": {"team": "cache"}},
                    "spec": {
                        "type": "LoadBalancer",
                        "clusterIP": "10.96.0.20",
                        "externalIPs": ["1.2.3.4"],
                        "loadBalancerIP": "5.6.7.8",
                        "externalTrafficPolicy": "Local",
                        "healthCheckNodePort": 32000,
                        "ports": [{"name": "db", "port": 11311, "nodePort": 31211}]
                    }
                },
                "monitor": {
                    "agent": "prometheus.io/coreos-operator",
                    "prometheus": {"exporter": {"port": 9150}}
                }
            }
        }))
        .unwrap();

        let template = &resource.spec.service_template.spec;
        assert_eq!(resource.spec.replicas, 3);
        assert_eq!(template.type_.as_deref(), Some("LoadBalancer"));
        assert_eq!(template.cluster_ip.as_deref(), Some("10.96.0.20"));
        assert_eq!(template.external_ips, vec!["1.2.3.4".to_string()]);
        assert_eq!(template.load_balancer_ip.as_deref(), Some("5.6.7.8"));
        assert_eq!(template.health_check_node_port, Some(32000));
        assert_eq!(template.ports[0].node_port, Some(31211));
        assert_eq!(
            resource.spec.monitor.as_ref().unwrap().agent,
            Some(AgentType::PrometheusCoreosOperator)
        );
        assert_eq!(resource.exporter_port(), 9150);
        assert_eq!(
            resource.monitoring_vendor(),
            Some(MonitoringVendor::Prometheus)
        );
    }

    #[test]
    fn test_deserialize_minimal_resource_uses_defaults() {
        let resource: Memcached = serde_json::from_value(json!({
            "apiVersion": "kubedb.com/v1alpha1",
            "kind": "Memcached",
            "metadata": {"name": "memcd"},
            "spec": {"monitor": {"agent": "prometheus.io/builtin"}}
        }))
        .unwrap();

        assert_eq!(resource.spec.replicas, 1);
        assert_eq!(resource.exporter_port(), DEFAULT_EXPORTER_PORT);
        assert!(resource.spec.service_template.spec.ports.is_empty());
    }

    #[test]
    fn test_monitor_without_agent_has_no_vendor() {
        let resource: Memcached = serde_json::from_value(json!({
            "apiVersion": "kubedb.com/v1alpha1",
            "kind": "Memcached",
            "metadata": {"name": "memcd"},
            "spec": {"monitor": {}}
        }))
        .unwrap();

        assert_eq!(resource.monitoring_vendor(), None);
    }

    #[test]
    fn test_unknown_agent_is_rejected() {
        let result: Result<Memcached, _> = serde_json::from_value(json!({
            "apiVersion": "kubedb.com/v1alpha1",
            "kind": "Memcached",
            "metadata": {"name": "memcd"},
            "spec": {"monitor": {"agent": "datadog"}}
        }));
        assert!(result.is_err());
    }
}

mod resources_tests {
    use memcached_operator::crd::{LABEL_DATABASE_KIND, LABEL_DATABASE_NAME, LABEL_ROLE};
    use memcached_operator::resources::common::{
        is_owned_by, offshoot_labels, service_labels, stats_service_labels,
    };
    use memcached_operator::resources::{owner_reference, service_name, stats_service_name};

    use crate::common::fixtures::MemcachedBuilder;

    #[test]
    fn test_service_names() {
        let resource = MemcachedBuilder::new("memcd").build();
        assert_eq!(service_name(&resource), "memcd");
        assert_eq!(stats_service_name(&resource), "memcd-stats");
    }

    #[test]
    fn test_reserved_labels_cannot_be_overridden() {
        let resource = MemcachedBuilder::new("memcd")
            .label("app", "cache")
            .label(LABEL_DATABASE_NAME, "spoofed")
            .service_label(LABEL_DATABASE_KIND, "Redis")
            .service_label("tier", "backend")
            .build();

        let labels = service_labels(&resource);
        assert_eq!(labels.get(LABEL_DATABASE_KIND).unwrap(), "Memcached");
        assert_eq!(labels.get(LABEL_DATABASE_NAME).unwrap(), "memcd");
        assert_eq!(labels.get("app").unwrap(), "cache");
        assert_eq!(labels.get("tier").unwrap(), "backend");
        assert!(is_owned_by(&labels, &resource));
    }

    #[test]
    fn test_stats_labels_add_role() {
        let resource = MemcachedBuilder::new("memcd").build();
        let labels = stats_service_labels(&resource);
        assert_eq!(labels.get(LABEL_ROLE).unwrap(), "stats");
        assert!(!offshoot_labels(&resource).contains_key(LABEL_ROLE));
        assert!(is_owned_by(&labels, &resource));
    }

    #[test]
    fn test_owner_reference() {
        let resource = MemcachedBuilder::new("memcd").uid("abc").build();
        let owner = owner_reference(&resource);
        assert_eq!(owner.api_version, "kubedb.com/v1alpha1");
        assert_eq!(owner.kind, "Memcached");
        assert_eq!(owner.name, "memcd");
        assert_eq!(owner.uid, "abc");
        assert_eq!(owner.block_owner_deletion, Some(true));
    }
}

mod validation_tests {
    use memcached_operator::controller::validation::validate_spec;
    use memcached_operator::crd::AgentType;

    use crate::common::fixtures::MemcachedBuilder;

    #[test]
    fn test_default_resource_is_valid() {
        assert!(validate_spec(&MemcachedBuilder::new("memcd").build()).is_ok());
    }

    #[test]
    fn test_zero_replicas_rejected() {
        let resource = MemcachedBuilder::new("memcd").replicas(0).build();
        assert!(validate_spec(&resource).is_err());
    }

    #[test]
    fn test_load_balancer_with_local_policy_is_valid() {
        let mut resource = MemcachedBuilder::new("memcd")
            .service_type("LoadBalancer")
            .external_traffic_policy("Local")
            .port_override("db", Some(11211), Some(31211))
            .build();
        resource.spec.service_template.spec.health_check_node_port = Some(32000);
        assert!(validate_spec(&resource).is_ok());
    }

    #[test]
    fn test_unknown_service_type_rejected() {
        let resource = MemcachedBuilder::new("memcd").service_type("Ingress").build();
        let err = validate_spec(&resource).unwrap_err();
        assert!(err.to_string().contains("Ingress"));
    }

    #[test]
    fn test_headless_node_port_rejected() {
        let resource = MemcachedBuilder::new("memcd")
            .service_type("NodePort")
            .cluster_ip("None")
            .build();
        assert!(validate_spec(&resource).is_err());
    }

    #[test]
    fn test_traffic_policy_on_cluster_ip_rejected() {
        let resource = MemcachedBuilder::new("memcd")
            .external_traffic_policy("Local")
            .build();
        assert!(validate_spec(&resource).is_err());
    }

    #[test]
    fn test_bad_port_names_rejected() {
        for name in ["", "DB", "-db", "a-very-long-port-name"] {
            let resource = MemcachedBuilder::new("memcd")
                .port_override(name, Some(11211), None)
                .build();
            assert!(validate_spec(&resource).is_err(), "name {name:?}");
        }
    }

    #[test]
    fn test_duplicate_port_override_rejected() {
        let resource = MemcachedBuilder::new("memcd")
            .port_override("db", Some(11211), None)
            .port_override("db", Some(11311), None)
            .build();
        assert!(validate_spec(&resource).is_err());
    }

    #[test]
    fn test_exporter_port_out_of_range_rejected() {
        let resource = MemcachedBuilder::new("memcd")
            .agent_with_port(AgentType::PrometheusBuiltin, 70000)
            .build();
        assert!(validate_spec(&resource).is_err());
    }
}

mod error_tests {
    use memcached_operator::controller::error::Error;

    #[test]
    fn test_error_is_retryable() {
        let kube_err = Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "timeout".to_string(),
            reason: "Timeout".to_string(),
            code: 504,
        }));
        assert!(kube_err.is_retryable());

        let validation_err = Error::Validation("invalid spec".to_string());
        assert!(!validation_err.is_retryable());

        let missing = Error::MissingField("metadata.namespace".to_string());
        assert!(!missing.is_retryable());
    }

    #[test]
    fn test_conflict_is_not_not_found() {
        let err = Error::AlreadyExists {
            namespace: "demo".to_string(),
            name: "memcd-stats".to_string(),
        };
        assert!(!err.is_not_found());
        assert!(err.is_already_exists());
    }
}

mod status_tests {
    use memcached_operator::controller::status::{
        ConditionBuilder, get_condition_reason, is_condition_true,
    };
    use memcached_operator::crd::Condition;

    #[test]
    fn test_condition_builder() {
        let mut builder = ConditionBuilder::new();
        builder.ready(true, "Reconciled", "Services ready", Some(1));
        builder.services_ready(false, "ReconcileFailed", "conflict", Some(1));
        let conditions = builder.build();

        assert_eq!(conditions.len(), 2);
        assert!(is_condition_true(&conditions, "Ready"));
        assert!(!is_condition_true(&conditions, "ServicesReady"));
        assert_eq!(
            get_condition_reason(&conditions, "ServicesReady"),
            Some("ReconcileFailed")
        );
    }

    #[test]
    fn test_condition_builder_updates_existing() {
        let mut builder = ConditionBuilder::new();
        builder.ready(false, "ReconcileFailed", "conflict", Some(1));
        builder.ready(true, "Reconciled", "Services ready", Some(2));
        let conditions = builder.build();

        // Should only have one Ready condition (updated)
        assert_eq!(conditions.len(), 1);
        assert!(is_condition_true(&conditions, "Ready"));
        assert_eq!(conditions[0].observed_generation, Some(2));
    }

    #[test]
    fn test_is_condition_true_missing() {
        let conditions: Vec<Condition> = vec![];
        assert!(!is_condition_true(&conditions, "Ready"));
        assert_eq!(get_condition_reason(&conditions, "Ready"), None);
    }
}

mod health_tests {
    use memcached_operator::controller::apply::VerbType;
    use memcached_operator::health::Metrics;

    #[test]
    fn test_metrics_encode() {
        let metrics = Metrics::new();
        metrics.record_reconcile("demo", "memcd", 0.02);
        metrics.record_error("demo", "memcd");
        metrics.record_service_operation("database", VerbType::Created);

        let text = metrics.encode();
        assert!(text.contains("memcached_operator_reconciliations_total"));
        assert!(text.contains("memcached_operator_reconciliation_errors_total"));
        assert!(text.contains("memcached_operator_reconcile_duration_seconds"));
        assert!(text.contains(r#"verb="created""#));
    }
}
