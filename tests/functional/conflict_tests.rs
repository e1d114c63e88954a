//! Ownership conflicts and API failures.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use memcached_operator::controller::error::Error;
use memcached_operator::controller::reconciler::ensure_services;
use memcached_operator::controller::services::{
    check_service, ensure_service, ensure_stats_service,
};
use memcached_operator::crd::{LABEL_DATABASE_KIND, LABEL_DATABASE_NAME};

use crate::common::fixtures::{monitored_resource, test_resource};
use crate::mock_store::{FailOn, MockServiceStore, RecordingEvents};

fn foreign_service(name: &str, labels: &[(&str, &str)]) -> Service {
    let labels: BTreeMap<String, String> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("demo".to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("10.96.1.1".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_check_service_missing_is_ok() {
    let store = MockServiceStore::new("demo");
    let resource = test_resource("memcd", "demo");
    check_service(&store, &resource, "memcd").await.unwrap();
}

#[tokio::test]
async fn test_check_service_owned_is_ok() {
    let store = MockServiceStore::new("demo");
    store.insert(foreign_service(
        "memcd",
        &[
            (LABEL_DATABASE_KIND, "Memcached"),
            (LABEL_DATABASE_NAME, "memcd"),
            ("tier", "backend"),
        ],
    ));
    let resource = test_resource("memcd", "demo");
    check_service(&store, &resource, "memcd").await.unwrap();
}

#[tokio::test]
async fn test_check_service_rejects_other_kind() {
    let store = MockServiceStore::new("demo");
    store.insert(foreign_service(
        "memcd",
        &[
            (LABEL_DATABASE_KIND, "Redis"),
            (LABEL_DATABASE_NAME, "memcd"),
        ],
    ));
    let resource = test_resource("memcd", "demo");

    let err = check_service(&store, &resource, "memcd").await.unwrap_err();
    assert!(err.is_already_exists());
    assert_eq!(
        err.to_string(),
        r#"intended service "demo/memcd" already exists"#
    );
}

#[tokio::test]
async fn test_check_service_rejects_other_name() {
    let store = MockServiceStore::new("demo");
    store.insert(foreign_service(
        "memcd",
        &[
            (LABEL_DATABASE_KIND, "Memcached"),
            (LABEL_DATABASE_NAME, "other"),
        ],
    ));
    let resource = test_resource("memcd", "demo");

    let err = check_service(&store, &resource, "memcd").await.unwrap_err();
    assert!(matches!(err, Error::AlreadyExists { ref name, .. } if name == "memcd"));
}

#[tokio::test]
async fn test_check_service_rejects_unlabelled() {
    let store = MockServiceStore::new("demo");
    store.insert(foreign_service("memcd", &[]));
    let resource = test_resource("memcd", "demo");

    assert!(
        check_service(&store, &resource, "memcd")
            .await
            .unwrap_err()
            .is_already_exists()
    );
}

#[tokio::test]
async fn test_foreign_service_is_never_modified() {
    let store = MockServiceStore::new("demo");
    let foreign = foreign_service("memcd", &[("app", "someone-else")]);
    store.insert(foreign.clone());
    let events = RecordingEvents::new();
    let resource = test_resource("memcd", "demo");

    let err = ensure_service(&store, &events, &resource)
        .await
        .unwrap_err();
    assert!(err.is_already_exists());
    assert_eq!(store.writes(), 0);
    assert_eq!(store.service("memcd").unwrap(), foreign);
    assert!(events.events().is_empty());
}

#[tokio::test]
async fn test_foreign_stats_service_conflicts() {
    let store = MockServiceStore::new("demo");
    store.insert(foreign_service("memcd-stats", &[("app", "exporter")]));
    let events = RecordingEvents::new();
    let resource = monitored_resource("memcd", "demo");

    let err = ensure_services(&store, &events, &resource)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        r#"intended service "demo/memcd-stats" already exists"#
    );
    // The database Service is handled first and still gets created
    assert!(store.service("memcd").is_some());
    assert_eq!(store.creates(), 1);
}

#[tokio::test]
async fn test_get_failure_propagates() {
    let store = MockServiceStore::new("demo");
    store.fail(FailOn::Get, 500);
    let events = RecordingEvents::new();
    let resource = test_resource("memcd", "demo");

    let err = ensure_service(&store, &events, &resource)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Kube(_)));
    assert!(!err.is_already_exists());
    assert!(err.is_retryable());
    assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn test_forbidden_get_propagates_from_check() {
    let store = MockServiceStore::new("demo");
    store.fail(FailOn::Get, 403);
    let resource = test_resource("memcd", "demo");

    let err = check_service(&store, &resource, "memcd").await.unwrap_err();
    assert!(!err.is_not_found());
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_create_failure_propagates_without_event() {
    let store = MockServiceStore::new("demo");
    store.fail(FailOn::Create, 403);
    let events = RecordingEvents::new();
    let resource = test_resource("memcd", "demo");

    assert!(ensure_service(&store, &events, &resource).await.is_err());
    assert!(store.service("memcd").is_none());
    assert!(events.events().is_empty());
}

#[tokio::test]
async fn test_patch_failure_propagates() {
    let store = MockServiceStore::new("demo");
    let events = RecordingEvents::new();
    let resource = monitored_resource("memcd", "demo");
    ensure_stats_service(&store, &events, &resource)
        .await
        .unwrap();

    store.fail(FailOn::Patch, 409);
    let mut changed = resource.clone();
    changed.spec.monitor.as_mut().unwrap().prometheus.exporter.port = 9150;

    let err = ensure_stats_service(&store, &events, &changed)
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(events.events().len(), 1);
}
