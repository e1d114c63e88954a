//! memcached-operator entry point.
//!
//! Configuration comes from the environment:
//! - `POD_NAME`: leader election identity, falls back to the hostname
//! - `POD_NAMESPACE`: namespace of the leader election Lease (default `default`)
//! - `WATCH_NAMESPACE`: restrict the controller to one namespace (default: all)
//! - `RUST_LOG`: extra log filter directives
//!
//! The health server starts right away so probes answer while the pod waits
//! for leadership. The controller only starts once the Lease is held.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use memcached_operator::health::{HealthState, run_health_server};
use memcached_operator::run_controller_scoped;

const LEASE_NAME: &str = "memcached-operator-leader";
const LEASE_TTL: Duration = Duration::from_secs(15);
const LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Time given to in-flight reconciliations after a shutdown signal
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Settings read from the pod environment.
#[derive(Debug, Clone)]
struct OperatorConfig {
    pod_name: String,
    pod_namespace: String,
    watch_namespace: Option<String>,
}

impl OperatorConfig {
    fn from_env() -> Self {
        let pod_name = std::env::var("POD_NAME").unwrap_or_else(|_| {
            warn!("POD_NAME not set, using hostname");
            hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "memcached-operator".to_string())
        });
        let pod_namespace = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| {
            warn!("POD_NAMESPACE not set, using 'default'");
            "default".to_string()
        });
        let watch_namespace = std::env::var("WATCH_NAMESPACE")
            .ok()
            .filter(|ns| !ns.is_empty());

        Self {
            pod_name,
            pod_namespace,
            watch_namespace,
        }
    }
}

fn init_tracing() -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::from_default_env()
        .add_directive("memcached_operator=info".parse()?)
        .add_directive("kube=info".parse()?)
        .add_directive("kube_leader_election=info".parse()?);
    tracing_subscriber::fmt().with_env_filter(filter).json().init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing()?;

    let config = OperatorConfig::from_env();
    info!(
        pod = %config.pod_name,
        namespace = %config.pod_namespace,
        watch_namespace = config.watch_namespace.as_deref().unwrap_or("all"),
        "Starting memcached-operator"
    );

    let client = Client::try_default().await?;
    let health_state = Arc::new(HealthState::new());

    let health_task = tokio::spawn(run_health_server(health_state.clone()));

    let lease = lease_lock(client.clone(), &config.pod_namespace, &config.pod_name);
    acquire_leadership(&lease, &config.pod_name).await;
    let lease_task = tokio::spawn(renew_lease(lease));

    let controller_task = {
        let health_state = health_state.clone();
        let watch_namespace = config.watch_namespace.clone();
        tokio::spawn(async move {
            run_controller_scoped(client, Some(health_state), watch_namespace.as_deref()).await;
        })
    };

    tokio::select! {
        result = controller_task => {
            if let Err(e) = result {
                error!(error = %e, "Controller task panicked");
            }
        }
        result = health_task => {
            match result {
                Ok(Err(e)) => error!(error = %e, "Health server failed"),
                Err(e) => error!(error = %e, "Health server task panicked"),
                Ok(Ok(())) => {}
            }
        }
        // renew_lease only returns by panicking
        Err(e) = lease_task => {
            error!(error = %e, "Lease renewal task panicked");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal");
            health_state.set_ready(false).await;
            info!(
                grace_secs = SHUTDOWN_GRACE_PERIOD.as_secs(),
                "Waiting for in-flight reconciliations"
            );
            tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;
        }
    }

    info!("Operator stopped");
    Ok(())
}

fn lease_lock(client: Client, namespace: &str, holder_id: &str) -> LeaseLock {
    LeaseLock::new(
        client,
        namespace,
        LeaseLockParams {
            holder_id: holder_id.to_string(),
            lease_name: LEASE_NAME.to_string(),
            lease_ttl: LEASE_TTL,
        },
    )
}

/// Block until this pod holds the Lease.
async fn acquire_leadership(lease: &LeaseLock, holder_id: &str) {
    info!(lease = LEASE_NAME, "Waiting to acquire leadership");
    loop {
        match lease.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {
                info!(holder_id = %holder_id, "Acquired leadership");
                return;
            }
            Ok(_) => info!("Another instance is leader, standing by"),
            Err(e) => warn!(error = %e, "Failed to acquire lease, retrying"),
        }
        tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
    }
}

/// Keep renewing the Lease.
///
/// Losing it ends the process so the pod restarts and re-enters the election.
#[allow(clippy::exit)]
async fn renew_lease(lease: LeaseLock) {
    loop {
        tokio::time::sleep(LEASE_RENEW_INTERVAL).await;

        match lease.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {}
            Ok(_) => {
                error!("Lost leadership, shutting down");
                std::process::exit(1);
            }
            Err(e) => {
                error!(error = %e, "Failed to renew lease, shutting down");
                std::process::exit(1);
            }
        }
    }
}

/// Wait for SIGTERM or SIGINT.
///
/// Without signal handlers there is no graceful shutdown, so failing to
/// install one is fatal.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
