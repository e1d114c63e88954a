//! Memcached Custom Resource Definition.
//!
//! Defines the Memcached CRD. The operator only manages the Services in front
//! of a Memcached deployment: the database Service and, when a Prometheus
//! agent is configured, the stats Service scraped by the exporter.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Memcached is a custom resource describing a Memcached database.
///
/// Example:
/// ```yaml
/// apiVersion: kubedb.com/v1alpha1
/// kind: Memcached
/// metadata:
///   name: memcd
/// spec:
///   version: "1.5.4"
///   replicas: 3
///   serviceTemplate:
///     metadata:
///       annotations:
///         service.beta.kubernetes.io/aws-load-balancer-internal: "true"
///     spec:
///       type: LoadBalancer
///   monitor:
///     agent: prometheus.io/builtin
///     prometheus:
///       exporter:
///         port: 56790
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "kubedb.com",
    version = "v1alpha1",
    kind = "Memcached",
    plural = "memcacheds",
    shortname = "mc",
    status = "MemcachedStatus",
    namespaced,
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MemcachedSpec {
    /// Memcached version.
    #[serde(default)]
    pub version: String,

    /// Number of Memcached instances (default 1).
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Template for the database Service.
    #[serde(default)]
    pub service_template: ServiceTemplateSpec,

    /// Monitoring agent configuration. Absent disables the stats Service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<AgentSpec>,
}

impl Default for MemcachedSpec {
    fn default() -> Self {
        Self {
            version: String::new(),
            replicas: default_replicas(),
            service_template: ServiceTemplateSpec::default(),
            monitor: None,
        }
    }
}

fn default_replicas() -> i32 {
    1
}

/// Desired metadata and spec for the database Service.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTemplateSpec {
    /// Labels and annotations for the Service.
    #[serde(default)]
    pub metadata: TemplateMeta,

    /// Network exposure settings for the Service.
    #[serde(default)]
    pub spec: ServiceTemplateServiceSpec,
}

/// Subset of ObjectMeta a template may set.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMeta {
    /// Extra labels. Keys under `kubedb.com/` are reserved and ignored.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Annotations copied verbatim onto the Service.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Subset of ServiceSpec a template may set.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTemplateServiceSpec {
    /// Overrides for ports managed by the operator, matched by name.
    #[serde(default)]
    pub ports: Vec<ServicePortOverride>,

    /// Cluster IP to request (`None` for headless).
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "clusterIP")]
    pub cluster_ip: Option<String>,

    /// Service type (ClusterIP, NodePort, LoadBalancer, ExternalName).
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "type")]
    pub type_: Option<String>,

    /// External IPs that route to this Service.
    #[serde(default, rename = "externalIPs")]
    pub external_ips: Vec<String>,

    /// Load balancer IP for LoadBalancer Services.
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "loadBalancerIP")]
    pub load_balancer_ip: Option<String>,

    /// Client CIDRs allowed through the cloud load balancer.
    #[serde(default)]
    pub load_balancer_source_ranges: Vec<String>,

    /// External traffic policy (Cluster or Local).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_traffic_policy: Option<String>,

    /// Health check node port for LoadBalancer Services with Local policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_node_port: Option<i32>,
}

/// Override for a Service port, matched by name.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServicePortOverride {
    /// Name of the port to override.
    pub name: String,

    /// Port exposed by the Service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    /// Node port for NodePort and LoadBalancer Services.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_port: Option<i32>,
}

/// Monitoring agent configuration.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    /// Agent collecting the metrics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentType>,

    /// Prometheus specific settings.
    #[serde(default)]
    pub prometheus: PrometheusSpec,
}

impl AgentSpec {
    /// Vendor of the configured agent, if any.
    pub fn vendor(&self) -> Option<MonitoringVendor> {
        self.agent.map(|agent| agent.vendor())
    }
}

/// Supported monitoring agents.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum AgentType {
    /// Prometheus operator (ServiceMonitor based).
    #[serde(rename = "prometheus.io/operator")]
    PrometheusOperator,
    /// Plain Prometheus scraping annotated Services.
    #[serde(rename = "prometheus.io/builtin")]
    PrometheusBuiltin,
    /// Legacy CoreOS Prometheus operator.
    #[serde(rename = "prometheus.io/coreos-operator")]
    PrometheusCoreosOperator,
}

impl AgentType {
    /// Vendor behind the agent.
    pub fn vendor(self) -> MonitoringVendor {
        match self {
            AgentType::PrometheusOperator
            | AgentType::PrometheusBuiltin
            | AgentType::PrometheusCoreosOperator => MonitoringVendor::Prometheus,
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentType::PrometheusOperator => write!(f, "prometheus.io/operator"),
            AgentType::PrometheusBuiltin => write!(f, "prometheus.io/builtin"),
            AgentType::PrometheusCoreosOperator => write!(f, "prometheus.io/coreos-operator"),
        }
    }
}

/// Monitoring vendors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MonitoringVendor {
    Prometheus,
}

/// Prometheus settings.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusSpec {
    /// Exporter sidecar settings.
    #[serde(default)]
    pub exporter: ExporterSpec,
}

/// Prometheus exporter settings.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExporterSpec {
    /// Port the exporter serves metrics on (default: 56790).
    #[serde(default = "default_exporter_port")]
    pub port: i32,
}

impl Default for ExporterSpec {
    fn default() -> Self {
        Self {
            port: default_exporter_port(),
        }
    }
}

fn default_exporter_port() -> i32 {
    DEFAULT_EXPORTER_PORT
}

/// Status of a Memcached.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemcachedStatus {
    /// Current phase.
    #[serde(default)]
    pub phase: MemcachedPhase,

    /// Reason for the current phase, set when Failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// The generation most recently observed by the controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions describing the current state.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Lifecycle phase of a Memcached.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum MemcachedPhase {
    /// Not reconciled yet.
    #[default]
    Pending,
    /// Services exist and match the spec.
    Running,
    /// Reconciliation failed and needs attention.
    Failed,
}

impl std::fmt::Display for MemcachedPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemcachedPhase::Pending => write!(f, "Pending"),
            MemcachedPhase::Running => write!(f, "Running"),
            MemcachedPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Condition describes the state of a Memcached at a certain point.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    pub message: String,
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: String,
    /// The generation of the resource this condition was observed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition.
    pub fn new(
        condition_type: &str,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
            observed_generation: generation,
        }
    }

    /// Create a "Ready" condition.
    pub fn ready(ready: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Ready", ready, reason, message, generation)
    }

    /// Create a "ServicesReady" condition.
    pub fn services_ready(
        ready: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self::new("ServicesReady", ready, reason, message, generation)
    }
}

/// API group of the Memcached resource.
pub const API_GROUP: &str = "kubedb.com";

/// Kind of the Memcached resource.
pub const RESOURCE_KIND_MEMCACHED: &str = "Memcached";

/// Label carrying the kind of database that owns a resource.
pub const LABEL_DATABASE_KIND: &str = "kubedb.com/kind";

/// Label carrying the name of the database that owns a resource.
pub const LABEL_DATABASE_NAME: &str = "kubedb.com/name";

/// Label carrying the role of an offshoot resource.
pub const LABEL_ROLE: &str = "kubedb.com/role";

/// Role value for the stats Service.
pub const ROLE_STATS: &str = "stats";

/// Default Memcached client port.
pub const DEFAULT_DB_PORT: i32 = 11211;

/// Name of the database port.
pub const DB_PORT_NAME: &str = "db";

/// Default Prometheus exporter port.
pub const DEFAULT_EXPORTER_PORT: i32 = 56790;

/// Name of the Prometheus exporter port.
pub const PROMETHEUS_EXPORTER_PORT_NAME: &str = "prom-http";

impl Memcached {
    /// Monitoring vendor configured for this database, if any.
    pub fn monitoring_vendor(&self) -> Option<MonitoringVendor> {
        self.spec.monitor.as_ref().and_then(AgentSpec::vendor)
    }

    /// Port the Prometheus exporter listens on.
    pub fn exporter_port(&self) -> i32 {
        self.spec
            .monitor
            .as_ref()
            .map(|m| m.prometheus.exporter.port)
            .unwrap_or(DEFAULT_EXPORTER_PORT)
    }
}
