//! State shared by every reconcile, and the event seam.

use std::future::Future;
use std::sync::Arc;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tracing::warn;

use crate::crd::Memcached;
use crate::health::HealthState;

/// Field manager and event reporter name
pub const FIELD_MANAGER: &str = "memcached-operator";

/// Publishes Kubernetes events about a Memcached.
///
/// Publishing is best effort: implementations log failures instead of
/// returning them.
pub trait EventPublisher: Send + Sync {
    fn publish_normal_event(
        &self,
        resource: &Memcached,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) -> impl Future<Output = ()> + Send;

    fn publish_warning_event(
        &self,
        resource: &Memcached,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) -> impl Future<Output = ()> + Send;
}

/// Controller context handed to `reconcile` and `error_policy`.
#[derive(Clone)]
pub struct Context {
    pub client: Client,
    recorder: Recorder,
    /// Metrics and readiness, absent when running without a health server
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    pub fn new(client: Client, health_state: Option<Arc<HealthState>>) -> Self {
        let reporter = Reporter {
            controller: FIELD_MANAGER.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client.clone(), reporter),
            client,
            health_state,
        }
    }

    async fn publish(
        &self,
        resource: &Memcached,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self
            .recorder
            .publish(&event, &resource.object_ref(&()))
            .await
        {
            warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }
}

impl EventPublisher for Context {
    async fn publish_normal_event(
        &self,
        resource: &Memcached,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(resource, EventType::Normal, reason, action, note)
            .await;
    }

    async fn publish_warning_event(
        &self,
        resource: &Memcached,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(resource, EventType::Warning, reason, action, note)
            .await;
    }
}
