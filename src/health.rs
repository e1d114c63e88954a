//! Probe and metrics endpoints.
//!
//! | Path | Answers |
//! |------|---------|
//! | `/healthz` | 200 while the process serves requests |
//! | `/readyz` | 200 once the controller runs, 503 before and during shutdown |
//! | `/metrics` | Prometheus text exposition |

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::controller::apply::VerbType;

/// Port the health server listens on
pub const HEALTH_PORT: u16 = 8080;

const METRICS_PREFIX: &str = "memcached_operator";

/// Identifies the Memcached a reconcile ran for.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    pub namespace: String,
    pub name: String,
}

impl ReconcileLabels {
    fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

/// Identifies a Service write: which Service, and what happened to it.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ServiceOperationLabels {
    /// "database" or "stats"
    pub service: String,
    pub verb: String,
}

/// Operator metrics, all registered under the `memcached_operator_` prefix.
pub struct Metrics {
    pub reconciliations_total: Family<ReconcileLabels, Counter>,
    pub reconciliation_errors_total: Family<ReconcileLabels, Counter>,
    pub reconcile_duration_seconds: Family<ReconcileLabels, Histogram>,
    pub service_operations_total: Family<ServiceOperationLabels, Counter>,
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix(METRICS_PREFIX);

        let reconciliations_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "reconciliations",
            "Reconciliations that completed",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "reconciliation_errors",
            "Reconciliations that returned an error",
            reconciliation_errors_total.clone(),
        );

        // 1ms up to ~16s
        let reconcile_duration_seconds =
            Family::<ReconcileLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "reconcile_duration_seconds",
            "Time spent in a successful reconcile",
            reconcile_duration_seconds.clone(),
        );

        let service_operations_total = Family::<ServiceOperationLabels, Counter>::default();
        registry.register(
            "service_operations",
            "Service create-or-patch outcomes by service and verb",
            service_operations_total.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            service_operations_total,
            registry,
        }
    }

    /// Count a completed reconcile and observe how long it took.
    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        let labels = ReconcileLabels::new(namespace, name);
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    pub fn record_error(&self, namespace: &str, name: &str) {
        self.reconciliation_errors_total
            .get_or_create(&ReconcileLabels::new(namespace, name))
            .inc();
    }

    pub fn record_service_operation(&self, service: &str, verb: VerbType) {
        let labels = ServiceOperationLabels {
            service: service.to_string(),
            verb: verb.to_string(),
        };
        self.service_operations_total.get_or_create(&labels).inc();
    }

    /// Render the registry in the Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            error!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        buffer
    }
}

/// State behind the health endpoints.
pub struct HealthState {
    ready: RwLock<bool>,
    pub metrics: Metrics,
    /// Unix seconds of the last successful reconcile, 0 before the first
    pub last_reconcile: AtomicU64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Not ready until the controller starts.
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
            last_reconcile: AtomicU64::new(0),
        }
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }

    pub fn touch_last_reconcile(&self) {
        let now = jiff::Timestamp::now().as_second();
        self.last_reconcile
            .store(u64::try_from(now).unwrap_or_default(), Ordering::Relaxed);
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    (
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.metrics.encode(),
    )
}

/// Router serving the health endpoints.
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the health endpoints on `0.0.0.0:HEALTH_PORT` until the listener fails.
pub async fn run_health_server(state: Arc<HealthState>) -> Result<(), std::io::Error> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], HEALTH_PORT));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(port = HEALTH_PORT, "Health server listening");
    axum::serve(listener, create_router(state)).await
}
