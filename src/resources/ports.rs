//! Service port definitions and merging.
//!
//! The API server fills in fields such as `nodePort` that the operator never
//! sets. Merging carries those over from the live object so that a patch
//! built from the desired ports does not reassign them.

use k8s_openapi::api::core::v1::ServicePort;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::crd::{DB_PORT_NAME, DEFAULT_DB_PORT, PROMETHEUS_EXPORTER_PORT_NAME, ServicePortOverride};

/// Memcached client port exposed by the database Service.
pub fn default_db_port() -> ServicePort {
    ServicePort {
        name: Some(DB_PORT_NAME.to_string()),
        protocol: Some("TCP".to_string()),
        port: DEFAULT_DB_PORT,
        target_port: Some(IntOrString::String(DB_PORT_NAME.to_string())),
        ..Default::default()
    }
}

/// Prometheus exporter port exposed by the stats Service.
pub fn exporter_port(port: i32) -> ServicePort {
    ServicePort {
        name: Some(PROMETHEUS_EXPORTER_PORT_NAME.to_string()),
        protocol: Some("TCP".to_string()),
        port,
        target_port: Some(IntOrString::String(
            PROMETHEUS_EXPORTER_PORT_NAME.to_string(),
        )),
        ..Default::default()
    }
}

/// Merge live ports into the desired ports.
///
/// Returns the desired ports; each one picks up the `nodePort`, `protocol`,
/// and `targetPort` of its live counterpart when it leaves them unset. Named
/// ports are matched by name, unnamed ones by port number. Live ports with
/// no desired counterpart are dropped.
pub fn merge_service_ports(current: &[ServicePort], desired: Vec<ServicePort>) -> Vec<ServicePort> {
    if current.is_empty() {
        return desired;
    }

    desired
        .into_iter()
        .map(|mut port| {
            let Some(live) = current.iter().find(|c| same_port(c, &port)) else {
                return port;
            };
            if port.node_port.unwrap_or(0) == 0 {
                port.node_port = live.node_port;
            }
            if port.protocol.is_none() {
                port.protocol = live.protocol.clone();
            }
            if port.target_port.is_none() {
                port.target_port = live.target_port.clone();
            }
            port
        })
        .collect()
}

fn same_port(a: &ServicePort, b: &ServicePort) -> bool {
    match (&a.name, &b.name) {
        (Some(x), Some(y)) if !x.is_empty() || !y.is_empty() => x == y,
        _ => a.port == b.port,
    }
}

/// Apply user overrides to ports by name.
///
/// Only ports already in `ports` are affected; overrides naming an unknown
/// port are ignored.
pub fn apply_port_overrides(
    mut ports: Vec<ServicePort>,
    overrides: &[ServicePortOverride],
) -> Vec<ServicePort> {
    for port in &mut ports {
        let Some(name) = port.name.as_deref() else {
            continue;
        };
        let Some(over) = overrides.iter().find(|o| o.name == name) else {
            continue;
        };
        if let Some(p) = over.port.filter(|p| *p > 0) {
            port.port = p;
        }
        if let Some(np) = over.node_port.filter(|np| *np > 0) {
            port.node_port = Some(np);
        }
    }
    ports
}
