//! Reconciliation loop for Memcached.
//!
//! Each pass validates the spec, ensures the database and stats Services,
//! and records the outcome in the Memcached status. Owned Services are
//! removed by the garbage collector through their owner references, so
//! deletion needs no finalizer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::{ResourceExt, runtime::controller::Action};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::{
    controller::{
        apply::{KubeServiceStore, ServiceStore, VerbType},
        context::{Context, EventPublisher},
        error::Error,
        services::{ensure_service, ensure_stats_service},
        status::{ConditionBuilder, KubeStatusWriter, StatusWriter},
        validation::validate_spec,
    },
    crd::{Memcached, MemcachedPhase, MemcachedStatus},
};

/// Requeue interval once the Services are in sync
const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Outcome of ensuring both Services
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServicesOutcome {
    pub database: VerbType,
    pub stats: VerbType,
}

impl ServicesOutcome {
    /// Whether this pass wrote anything
    pub fn changed(&self) -> bool {
        self.database != VerbType::Unchanged || self.stats != VerbType::Unchanged
    }
}

/// Reconcile a Memcached
pub async fn reconcile(obj: Arc<Memcached>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj
        .namespace()
        .ok_or_else(|| Error::MissingField("metadata.namespace".to_string()))?;

    debug!(name = %name, namespace = %namespace, "Reconciling Memcached");

    if obj.metadata.deletion_timestamp.is_some() {
        debug!(name = %name, "Memcached is being deleted, leaving Services to garbage collection");
        return Ok(Action::await_change());
    }

    let store = KubeServiceStore::new(ctx.client.clone(), &namespace);
    let status = KubeStatusWriter::new(ctx.client.clone(), &namespace);
    let outcome = reconcile_services(&store, &status, ctx.as_ref(), &obj).await?;

    if outcome.changed() {
        info!(
            name = %name,
            database = %outcome.database,
            stats = %outcome.stats,
            "Services reconciled"
        );
    }

    if let Some(ref health_state) = ctx.health_state {
        let duration = start_time.elapsed().as_secs_f64();
        let metrics = &health_state.metrics;
        metrics.record_reconcile(&namespace, &name, duration);
        metrics.record_service_operation("database", outcome.database);
        metrics.record_service_operation("stats", outcome.stats);
        health_state.touch_last_reconcile();
    }

    Ok(Action::requeue(RESYNC_INTERVAL))
}

/// One pass over a Memcached that is not being deleted.
///
/// Validates the spec, ensures both Services, and records the result in the
/// status. Validation failures and Service name conflicts publish a Warning
/// event and mark the Memcached `Failed`; the original error is returned
/// even when that status write fails.
pub async fn reconcile_services<S, W, P>(
    store: &S,
    status: &W,
    events: &P,
    obj: &Memcached,
) -> Result<ServicesOutcome, Error>
where
    S: ServiceStore,
    W: StatusWriter,
    P: EventPublisher,
{
    let name = obj.name_any();

    if let Err(e) = validate_spec(obj) {
        error!(name = %name, error = %e, "Validation failed");
        events
            .publish_warning_event(obj, "ValidationFailed", "Validating", Some(e.to_string()))
            .await;
        record_failure(status, obj, &e).await;
        return Err(e);
    }

    let outcome = match ensure_services(store, events, obj).await {
        Ok(outcome) => outcome,
        Err(e) if e.is_already_exists() => {
            warn!(name = %name, error = %e, "Service name is taken by another owner");
            events
                .publish_warning_event(obj, "ServiceConflict", "Reconciling", Some(e.to_string()))
                .await;
            record_failure(status, obj, &e).await;
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    update_status(status, obj, MemcachedPhase::Running, None).await?;
    Ok(outcome)
}

/// Ensure the database Service, then the stats Service
pub async fn ensure_services<S, P>(
    store: &S,
    events: &P,
    resource: &Memcached,
) -> Result<ServicesOutcome, Error>
where
    S: ServiceStore,
    P: EventPublisher,
{
    let database = ensure_service(store, events, resource).await?;
    let stats = ensure_stats_service(store, events, resource).await?;
    Ok(ServicesOutcome { database, stats })
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<Memcached>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&namespace, &name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}

/// Mark the Memcached `Failed` with `error` as the reason, logging a failed write.
async fn record_failure<W: StatusWriter>(status: &W, obj: &Memcached, error: &Error) {
    let message = error.to_string();
    if let Err(e) = update_status(status, obj, MemcachedPhase::Failed, Some(&message)).await {
        warn!(name = %obj.name_any(), error = %e, "Failed to record failure in status");
    }
}

/// Status patch for `phase`, keeping the existing condition history.
pub fn status_patch(
    obj: &Memcached,
    phase: MemcachedPhase,
    error_message: Option<&str>,
) -> Result<Value, Error> {
    let generation = obj.metadata.generation;
    let existing = obj
        .status
        .as_ref()
        .map(|s| s.conditions.as_slice())
        .unwrap_or_default();

    let mut conditions = ConditionBuilder::from_existing(existing);
    match phase {
        MemcachedPhase::Running => {
            conditions
                .services_ready(true, "Reconciled", "Services match the spec", generation)
                .ready(true, "Reconciled", "Memcached Services are ready", generation);
        }
        _ => {
            let message = error_message.unwrap_or("Reconciliation failed");
            conditions
                .services_ready(false, "ReconcileFailed", message, generation)
                .ready(false, "ReconcileFailed", message, generation);
        }
    }

    let status = MemcachedStatus {
        phase,
        reason: error_message.map(str::to_string),
        observed_generation: generation,
        conditions: conditions.build(),
    };

    let mut status = serde_json::to_value(&status)?;
    if error_message.is_none() {
        if let Some(fields) = status.as_object_mut() {
            // Merge patches only clear what is sent as null
            fields.insert("reason".to_string(), Value::Null);
        }
    }
    Ok(serde_json::json!({ "status": status }))
}

async fn update_status<W: StatusWriter>(
    status: &W,
    obj: &Memcached,
    phase: MemcachedPhase,
    error_message: Option<&str>,
) -> Result<(), Error> {
    let patch = status_patch(obj, phase, error_message)?;
    status.patch_status(&obj.name_any(), &patch).await
}
