//! Condition bookkeeping for `MemcachedStatus`, and the [`StatusWriter`]
//! seam the reconciler records outcomes through.

use std::future::Future;

use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde_json::Value;

use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::Result;
use crate::crd::{Condition, Memcached};

/// Writes the status subresource of Memcacheds in one namespace.
pub trait StatusWriter: Send + Sync {
    /// Apply a JSON merge patch (`{"status": {...}}`) to the status of `name`.
    fn patch_status(&self, name: &str, patch: &Value) -> impl Future<Output = Result<()>> + Send;
}

/// [`StatusWriter`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeStatusWriter {
    api: Api<Memcached>,
}

impl KubeStatusWriter {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

impl StatusWriter for KubeStatusWriter {
    async fn patch_status(&self, name: &str, patch: &Value) -> Result<()> {
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api
            .patch_status(name, &params, &Patch::Merge(patch))
            .await?;
        Ok(())
    }
}

/// Accumulates the conditions written with a status patch.
///
/// Starting from the last observed list keeps conditions this operator does
/// not touch, and keeps `lastTransitionTime` stable while a status holds.
#[derive(Default)]
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
}

impl ConditionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_existing(conditions: &[Condition]) -> Self {
        Self {
            conditions: conditions.to_vec(),
        }
    }

    /// Replace the condition of the same type, or append it.
    pub fn set(&mut self, mut condition: Condition) -> &mut Self {
        let slot = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type);
        match slot {
            Some(current) => {
                if current.status == condition.status {
                    condition.last_transition_time =
                        std::mem::take(&mut current.last_transition_time);
                }
                *current = condition;
            }
            None => self.conditions.push(condition),
        }
        self
    }

    pub fn ready(
        &mut self,
        ready: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::ready(ready, reason, message, generation))
    }

    pub fn services_ready(
        &mut self,
        ready: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::services_ready(ready, reason, message, generation))
    }

    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// `true` only when the condition exists with status `"True"`.
pub fn is_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    find_condition(conditions, condition_type).is_some_and(|c| c.status == "True")
}

pub fn get_condition_reason<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a str> {
    find_condition(conditions, condition_type).map(|c| c.reason.as_str())
}
