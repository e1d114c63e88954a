//! Common resource generation utilities.
//!
//! Provides names, labels, and owner references shared by every resource the
//! operator manages for a Memcached.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use crate::crd::{
    API_GROUP, LABEL_DATABASE_KIND, LABEL_DATABASE_NAME, LABEL_ROLE, Memcached,
    RESOURCE_KIND_MEMCACHED, ROLE_STATS,
};

/// Name shared by resources created on behalf of a Memcached.
pub fn offshoot_name(resource: &Memcached) -> String {
    resource.name_any()
}

/// Name of the database Service.
pub fn service_name(resource: &Memcached) -> String {
    offshoot_name(resource)
}

/// Name of the stats Service scraped by Prometheus.
pub fn stats_service_name(resource: &Memcached) -> String {
    format!("{}-stats", offshoot_name(resource))
}

/// Labels selecting the pods of a Memcached.
pub fn offshoot_selectors(resource: &Memcached) -> BTreeMap<String, String> {
    let mut selectors = BTreeMap::new();
    selectors.insert(
        LABEL_DATABASE_KIND.to_string(),
        RESOURCE_KIND_MEMCACHED.to_string(),
    );
    selectors.insert(LABEL_DATABASE_NAME.to_string(), resource.name_any());
    selectors
}

/// Labels applied to offshoot resources: the Memcached's own labels, minus
/// reserved keys, overlaid with the selectors.
pub fn offshoot_labels(resource: &Memcached) -> BTreeMap<String, String> {
    let mut labels = without_reserved_keys(resource.labels());
    labels.extend(offshoot_selectors(resource));
    labels
}

/// Labels for the database Service.
///
/// Template labels are applied first so they can never override the
/// ownership labels checked before the Service is patched.
pub fn service_labels(resource: &Memcached) -> BTreeMap<String, String> {
    let mut labels = without_reserved_keys(&resource.spec.service_template.metadata.labels);
    labels.extend(offshoot_labels(resource));
    labels
}

/// Labels for the stats Service.
pub fn stats_service_labels(resource: &Memcached) -> BTreeMap<String, String> {
    let mut labels = offshoot_labels(resource);
    labels.insert(LABEL_ROLE.to_string(), ROLE_STATS.to_string());
    labels
}

/// Whether an object's labels mark it as belonging to this Memcached.
pub fn is_owned_by(labels: &BTreeMap<String, String>, resource: &Memcached) -> bool {
    labels.get(LABEL_DATABASE_KIND).map(String::as_str) == Some(RESOURCE_KIND_MEMCACHED)
        && labels.get(LABEL_DATABASE_NAME) == Some(&resource.name_any())
}

fn without_reserved_keys(labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let prefix = format!("{API_GROUP}/");
    labels
        .iter()
        .filter(|(key, _)| !key.starts_with(&prefix))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Create the controller owner reference for a Memcached
pub fn owner_reference(resource: &Memcached) -> OwnerReference {
    OwnerReference {
        api_version: Memcached::api_version(&()).to_string(),
        kind: Memcached::kind(&()).to_string(),
        name: resource.name_any(),
        uid: resource.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Add `owner` to the object's owner references. Other owners are left in
/// place.
///
/// An entry with the same UID is replaced, and so is a controller entry for
/// the same kind and name: a Memcached recreated before garbage collection
/// has a new UID, and an object may only have one controller.
pub fn ensure_owner_reference(meta: &mut ObjectMeta, owner: OwnerReference) {
    let refs = meta.owner_references.get_or_insert_with(Vec::new);
    let same_owner = |r: &&mut OwnerReference| {
        r.uid == owner.uid
            || (r.controller == Some(true) && r.kind == owner.kind && r.name == owner.name)
    };
    match refs.iter_mut().find(same_owner) {
        Some(existing) => *existing = owner,
        None => refs.push(owner),
    }
}
