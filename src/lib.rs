//! memcached-operator keeps the Services in front of Memcached databases in
//! line with their `Memcached` custom resources.
//!
//! - [`crd`]: the `Memcached` resource
//! - [`resources`]: names, labels, ports, and Service mutations
//! - [`controller`]: create-or-patch, the ensure operations, and the reconciler
//! - [`health`]: probes and Prometheus metrics

pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;

pub use health::HealthState;

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::controller::Error as ControllerError;
use kube::runtime::{Controller, WatchStreamExt, metadata_watcher, predicates, reflector, watcher};
use kube::{Api, Client, Resource};
use tracing::{debug, error, info};

use controller::context::Context;
use controller::error::Error;
use controller::reconciler::{error_policy, reconcile};
use crd::Memcached;

/// Api for `K` in one namespace, or across the cluster when `namespace` is `None`.
pub fn scoped_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Run the Memcached controller, across the cluster when `namespace` is
/// `None`.
///
/// Memcacheds are watched through a reflector and only reconciled when their
/// generation changes, so status writes do not retrigger a pass. Owned
/// Services are watched by metadata only; any change to one requeues its
/// owner.
pub async fn run_controller_scoped(
    client: Client,
    health_state: Option<Arc<HealthState>>,
    namespace: Option<&str>,
) {
    info!(
        scope = namespace.unwrap_or("cluster-wide"),
        "Starting Memcached controller"
    );

    if let Some(state) = &health_state {
        state.set_ready(true).await;
    }

    let memcacheds: Api<Memcached> = scoped_api(client.clone(), namespace);
    let services: Api<Service> = scoped_api(client.clone(), namespace);
    let config = watcher::Config::default().any_semantic();

    let (store, writer) = reflector::store();
    let memcached_events = reflector(writer, watcher(memcacheds, config.clone()))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);
    let service_events = metadata_watcher(services, config)
        .default_backoff()
        .touched_objects();

    let ctx = Arc::new(Context::new(client, health_state));

    Controller::for_stream(memcached_events, store)
        .owns_stream(service_events)
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _)) => debug!(name = %obj.name, "Reconciled"),
                // Owned Services can still fire after their Memcached is gone
                Err(e) if is_gone(&e) => debug!(error = ?e, "Memcached no longer exists"),
                Err(e) => error!(error = ?e, "Reconciliation error"),
            }
        })
        .await;

    error!("Memcached controller stream ended");
}

fn is_gone(e: &ControllerError<Error, watcher::Error>) -> bool {
    match e {
        ControllerError::ObjectNotFound(_) => true,
        ControllerError::ReconcilerFailed(err, _) => err.is_not_found(),
        _ => false,
    }
}
