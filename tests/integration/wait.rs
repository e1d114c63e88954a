//! Waiting on cluster state through kube's `await_condition`.

use std::fmt::Debug;
use std::time::Duration;

use kube::Resource;
use kube::api::Api;
use kube::runtime::wait::{self, Condition, await_condition};
use serde::de::DeserializeOwned;
use tokio::time::timeout;

use memcached_operator::crd::{Memcached, MemcachedPhase};

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("Timeout waiting for condition after {0:?}")]
    Timeout(Duration),

    #[error("Resource does not exist")]
    Missing,

    #[error("Wait failed: {0}")]
    Wait(#[from] wait::Error),
}

/// Wait until `condition` holds for the object `name` and return it.
pub async fn wait_for_condition<K, C>(
    api: &Api<K>,
    name: &str,
    condition: C,
    limit: Duration,
) -> Result<K, WaitError>
where
    K: Resource + Clone + Debug + Send + DeserializeOwned + 'static,
    C: Condition<K>,
{
    let found = timeout(limit, await_condition(api.clone(), name, condition))
        .await
        .map_err(|_| WaitError::Timeout(limit))??;
    found.ok_or(WaitError::Missing)
}

/// Wait until the object `name` exists.
pub async fn wait_for_resource<K>(api: &Api<K>, name: &str, limit: Duration) -> Result<K, WaitError>
where
    K: Resource + Clone + Debug + Send + DeserializeOwned + 'static,
{
    wait_for_condition(api, name, |obj: Option<&K>| obj.is_some(), limit).await
}

/// Whether the Memcached reports `phase` for its current generation.
pub fn is_phase(resource: &Memcached, phase: MemcachedPhase) -> bool {
    resource.status.as_ref().is_some_and(|s| {
        s.phase == phase && s.observed_generation == resource.metadata.generation
    })
}

/// Wait until the Memcached `name` reaches `phase`.
pub async fn wait_for_phase(
    api: &Api<Memcached>,
    name: &str,
    phase: MemcachedPhase,
    limit: Duration,
) -> Result<Memcached, WaitError> {
    wait_for_condition(
        api,
        name,
        move |obj: Option<&Memcached>| obj.is_some_and(|m| is_phase(m, phase)),
        limit,
    )
    .await
}
