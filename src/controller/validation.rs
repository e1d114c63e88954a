//! Validation logic for Memcached specs.
//!
//! Rejects service templates and monitoring settings the API server would
//! refuse, so the problem is reported on the Memcached instead of as a
//! failed Service write.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::controller::error::{Error, Result};
use crate::crd::{Memcached, ServiceTemplateServiceSpec};

/// Service types accepted by the API server
pub const SERVICE_TYPES: [&str; 4] = ["ClusterIP", "NodePort", "LoadBalancer", "ExternalName"];

/// External traffic policies accepted by the API server
pub const TRAFFIC_POLICIES: [&str; 2] = ["Cluster", "Local"];

/// Maximum length of a port name (IANA service name)
const MAX_PORT_NAME_LEN: usize = 15;

#[allow(clippy::expect_used)]
static PORT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").expect("port name pattern is valid")
});

/// Validate the resource spec
pub fn validate_spec(resource: &Memcached) -> Result<()> {
    validate_replicas(resource)?;
    validate_service_template(&resource.spec.service_template.spec)?;
    if let Some(monitor) = &resource.spec.monitor {
        validate_port("spec.monitor.prometheus.exporter.port", monitor.prometheus.exporter.port)?;
    }
    Ok(())
}

fn validate_replicas(resource: &Memcached) -> Result<()> {
    if resource.spec.replicas < 1 {
        return Err(Error::Validation(format!(
            "replica count {} is below minimum 1",
            resource.spec.replicas
        )));
    }
    Ok(())
}

/// Validate the service template spec
pub fn validate_service_template(spec: &ServiceTemplateServiceSpec) -> Result<()> {
    let mut seen = HashSet::new();
    for port in &spec.ports {
        validate_port_name(&port.name)?;
        if !seen.insert(port.name.as_str()) {
            return Err(Error::Validation(format!(
                "duplicate port name {:?} in spec.serviceTemplate.spec.ports",
                port.name
            )));
        }
        if let Some(p) = port.port {
            validate_port("spec.serviceTemplate.spec.ports[].port", p)?;
        }
        if let Some(np) = port.node_port {
            validate_port("spec.serviceTemplate.spec.ports[].nodePort", np)?;
        }
    }

    let type_ = spec.type_.as_deref().unwrap_or("ClusterIP");
    if !SERVICE_TYPES.contains(&type_) {
        return Err(Error::Validation(format!(
            "unsupported service type {type_:?}, expected one of {SERVICE_TYPES:?}"
        )));
    }
    let exposed = matches!(type_, "NodePort" | "LoadBalancer");

    if spec.cluster_ip.as_deref() == Some("None") && exposed {
        return Err(Error::Validation(format!(
            "clusterIP None (headless) cannot be used with service type {type_}"
        )));
    }

    if let Some(policy) = spec.external_traffic_policy.as_deref() {
        if !TRAFFIC_POLICIES.contains(&policy) {
            return Err(Error::Validation(format!(
                "unsupported externalTrafficPolicy {policy:?}, expected one of {TRAFFIC_POLICIES:?}"
            )));
        }
        if !exposed {
            return Err(Error::Validation(format!(
                "externalTrafficPolicy requires service type NodePort or LoadBalancer, got {type_}"
            )));
        }
    }

    if let Some(port) = spec.health_check_node_port.filter(|p| *p != 0) {
        validate_port("spec.serviceTemplate.spec.healthCheckNodePort", port)?;
        if type_ != "LoadBalancer" || spec.external_traffic_policy.as_deref() != Some("Local") {
            return Err(Error::Validation(
                "healthCheckNodePort requires service type LoadBalancer with externalTrafficPolicy Local"
                    .to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_port_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation(
            "port overrides must name the port they apply to".to_string(),
        ));
    }
    if name.len() > MAX_PORT_NAME_LEN || !PORT_NAME.is_match(name) {
        return Err(Error::Validation(format!(
            "invalid port name {name:?}: must be at most {MAX_PORT_NAME_LEN} lowercase alphanumeric characters or '-'"
        )));
    }
    Ok(())
}

fn validate_port(field: &str, port: i32) -> Result<()> {
    if !(1..=65535).contains(&port) {
        return Err(Error::Validation(format!(
            "{field} {port} is outside 1-65535"
        )));
    }
    Ok(())
}
