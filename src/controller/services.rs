//! Service reconciliation for a Memcached.
//!
//! Ensures the database Service and, when a Prometheus agent is configured,
//! the stats Service exist and carry the fields derived from the spec.
//! Services with the intended name that belong to something else are left
//! alone and reported as a conflict.

use kube::ResourceExt;
use tracing::{debug, info};

use crate::controller::apply::{ServiceStore, VerbType, create_or_patch_service};
use crate::controller::context::EventPublisher;
use crate::controller::error::{Error, Result};
use crate::crd::{Memcached, MonitoringVendor};
use crate::resources::common::{is_owned_by, service_name, stats_service_name};
use crate::resources::services::{mutate_database_service, mutate_stats_service};

/// Reason attached to events emitted after a Service write.
pub const EVENT_REASON_SUCCESSFUL: &str = "Successful";

/// Action attached to events emitted after a Service write.
const EVENT_ACTION: &str = "CreateOrPatch";

/// Ensure the database Service matches the spec.
pub async fn ensure_service<S, P>(store: &S, events: &P, resource: &Memcached) -> Result<VerbType>
where
    S: ServiceStore,
    P: EventPublisher,
{
    let name = service_name(resource);
    check_service(store, resource, &name).await?;

    let (_, verb) =
        create_or_patch_service(store, &name, |svc| mutate_database_service(svc, resource))
            .await?;

    if verb != VerbType::Unchanged {
        info!(service = %name, verb = %verb, "Reconciled database Service");
        events
            .publish_normal_event(
                resource,
                EVENT_REASON_SUCCESSFUL,
                EVENT_ACTION,
                Some(format!("Successfully {verb} Service")),
            )
            .await;
    }
    Ok(verb)
}

/// Ensure the stats Service matches the spec.
///
/// Does nothing unless the monitoring agent is a Prometheus one.
pub async fn ensure_stats_service<S, P>(
    store: &S,
    events: &P,
    resource: &Memcached,
) -> Result<VerbType>
where
    S: ServiceStore,
    P: EventPublisher,
{
    if resource.monitoring_vendor() != Some(MonitoringVendor::Prometheus) {
        info!(
            name = %resource.name_any(),
            "spec.monitor.agent is not a Prometheus agent, skipping stats Service"
        );
        return Ok(VerbType::Unchanged);
    }

    let name = stats_service_name(resource);
    check_service(store, resource, &name).await?;

    let (_, verb) =
        create_or_patch_service(store, &name, |svc| mutate_stats_service(svc, resource)).await?;

    if verb != VerbType::Unchanged {
        info!(service = %name, verb = %verb, "Reconciled stats Service");
        events
            .publish_normal_event(
                resource,
                EVENT_REASON_SUCCESSFUL,
                EVENT_ACTION,
                Some(format!("Successfully {verb} stats service")),
            )
            .await;
    }
    Ok(verb)
}

/// Fail with [`Error::AlreadyExists`] if a Service named `name` exists and
/// is not labelled as belonging to `resource`.
pub async fn check_service<S>(store: &S, resource: &Memcached, name: &str) -> Result<()>
where
    S: ServiceStore,
{
    let Some(service) = store.get(name).await? else {
        debug!(service = %name, "Service not found");
        return Ok(());
    };

    if !is_owned_by(service.labels(), resource) {
        return Err(Error::AlreadyExists {
            namespace: store.namespace().to_string(),
            name: name.to_string(),
        });
    }
    Ok(())
}
