//! Create-or-patch for Services.
//!
//! `create_or_patch_service` reads the live Service, runs a mutation over it,
//! and writes back only what changed. The API is reached through the
//! [`ServiceStore`] trait so the same code drives a real cluster and the
//! in-memory store used by tests.

use std::future::Future;

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::{Map, Value};
use tracing::debug;

use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::Result;

/// What a create-or-patch call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerbType {
    Created,
    Patched,
    Unchanged,
}

impl std::fmt::Display for VerbType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerbType::Created => write!(f, "created"),
            VerbType::Patched => write!(f, "patched"),
            VerbType::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Namespaced access to Services.
pub trait ServiceStore: Send + Sync {
    /// Namespace the store operates in.
    fn namespace(&self) -> &str;

    /// Fetch a Service, `None` when it does not exist.
    fn get(&self, name: &str) -> impl Future<Output = Result<Option<Service>>> + Send;

    /// Create a Service.
    fn create(&self, service: &Service) -> impl Future<Output = Result<Service>> + Send;

    /// Apply a JSON merge patch to a Service.
    fn patch(&self, name: &str, patch: &Value) -> impl Future<Output = Result<Service>> + Send;
}

/// [`ServiceStore`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeServiceStore {
    api: Api<Service>,
    namespace: String,
}

impl KubeServiceStore {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
        }
    }
}

impl ServiceStore for KubeServiceStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get(&self, name: &str) -> Result<Option<Service>> {
        Ok(self.api.get_opt(name).await?)
    }

    async fn create(&self, service: &Service) -> Result<Service> {
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        Ok(self.api.create(&params, service).await?)
    }

    async fn patch(&self, name: &str, patch: &Value) -> Result<Service> {
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        Ok(self.api.patch(name, &params, &Patch::Merge(patch)).await?)
    }
}

/// Create the Service `name` or patch it so that `mutate` holds.
///
/// A missing Service is created from `mutate` applied to an empty object
/// carrying only name and namespace. An existing one is patched with the
/// difference between it and `mutate(existing)`; when there is none, nothing
/// is written.
pub async fn create_or_patch_service<S, F>(
    store: &S,
    name: &str,
    mutate: F,
) -> Result<(Service, VerbType)>
where
    S: ServiceStore,
    F: FnOnce(Service) -> Service + Send,
{
    let Some(current) = store.get(name).await? else {
        let service = mutate(Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(store.namespace().to_string()),
                ..Default::default()
            },
            ..Default::default()
        });
        debug!(name = %name, namespace = %store.namespace(), "Creating Service");
        let created = store.create(&service).await?;
        return Ok((created, VerbType::Created));
    };

    let original = serde_json::to_value(&current)?;
    let modified = serde_json::to_value(mutate(current.clone()))?;
    let patch = merge_patch(&original, &modified);
    if is_empty_patch(&patch) {
        return Ok((current, VerbType::Unchanged));
    }

    debug!(name = %name, namespace = %store.namespace(), patch = %patch, "Patching Service");
    let patched = store.patch(name, &patch).await?;
    Ok((patched, VerbType::Patched))
}

/// Compute the JSON merge patch (RFC 7386) turning `original` into `modified`.
///
/// Removed keys become `null`; arrays and scalars are replaced wholesale.
pub fn merge_patch(original: &Value, modified: &Value) -> Value {
    let (Value::Object(original), Value::Object(modified)) = (original, modified) else {
        return modified.clone();
    };

    let mut patch = Map::new();
    for key in original.keys() {
        if !modified.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }
    for (key, new) in modified {
        match original.get(key) {
            Some(old) if old == new => {}
            Some(old @ Value::Object(_)) if new.is_object() => {
                patch.insert(key.clone(), merge_patch(old, new));
            }
            _ => {
                patch.insert(key.clone(), new.clone());
            }
        }
    }
    Value::Object(patch)
}

fn is_empty_patch(patch: &Value) -> bool {
    patch.as_object().is_some_and(Map::is_empty)
}
