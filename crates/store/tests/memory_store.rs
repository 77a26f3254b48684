#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use riff_core::ObjectKey;
use riff_kubehub::{LabelSelector, ObjectStore, StoreError, WatchEvent};
use riff_store::{MemoryStore, Verb};

fn cm(ns: &str, name: &str, labels: &[(&str, &str)]) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            namespace: Some(ns.into()),
            name: if name.is_empty() { None } else { Some(name.into()) },
            labels: Some(labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn generated(ns: &str, prefix: &str) -> ConfigMap {
    let mut c = cm(ns, "", &[]);
    c.metadata.generate_name = Some(prefix.into());
    c
}

#[tokio::test]
async fn generate_name_uses_store_wide_counter() {
    let store = MemoryStore::new();
    let a = store.create(&generated("ns", "a-")).await.unwrap();
    let b = store.create(&generated("ns", "b-")).await.unwrap();
    assert_eq!(a.metadata.name.as_deref(), Some("a-001"));
    assert_eq!(b.metadata.name.as_deref(), Some("b-002"));
    assert!(a.metadata.uid.is_some());
    assert_eq!(a.metadata.generation, Some(1));
    assert_eq!(store.created::<ConfigMap>().len(), 2);
}

#[tokio::test]
async fn fixed_name_collision_is_already_exists() {
    let store = MemoryStore::new().with(&cm("ns", "taken", &[]));
    let err = store.create(&cm("ns", "taken", &[])).await.unwrap_err();
    assert!(err.is_already_exists(), "{err}");
}

#[tokio::test]
async fn get_missing_is_not_found() {
    let store = MemoryStore::new();
    let err = store.get::<ConfigMap>(&ObjectKey::new("ns", "riff-build")).await.unwrap_err();
    assert_eq!(err.to_string(), "configmaps \"riff-build\" not found");
}

#[tokio::test]
async fn list_filters_by_namespace_and_selector() {
    let store = MemoryStore::new()
        .with(&cm("ns", "a", &[("app", "x")]))
        .with(&cm("ns", "b", &[("app", "y")]))
        .with(&cm("other", "c", &[("app", "x")]));
    let sel = LabelSelector::eq("app", "x");
    let names: Vec<_> = store.list::<ConfigMap>("ns", &sel).await.unwrap().into_iter().filter_map(|c| c.metadata.name).collect();
    assert_eq!(names, vec!["a"]);
    let all = store.list::<ConfigMap>("", &sel).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn update_checks_resource_version_and_keeps_status_apart() {
    let store = MemoryStore::new();
    let created = store.create(&cm("ns", "a", &[])).await.unwrap();

    let mut stale = created.clone();
    stale.metadata.resource_version = Some("0".into());
    let err = store.update(&stale).await.unwrap_err();
    assert!(err.is_conflict(), "{err}");

    let mut next = created.clone();
    next.data = Some(BTreeMap::from([("k".to_string(), "v".to_string())]));
    let updated = store.update(&next).await.unwrap();
    assert_eq!(updated.metadata.generation, Some(2));
    assert_eq!(updated.metadata.uid, created.metadata.uid);
}

#[tokio::test]
async fn induced_failures_are_recorded_and_returned() {
    let store = MemoryStore::new();
    store.fail_on::<ConfigMap>(Verb::Create);
    let err = store.create(&cm("ns", "a", &[])).await.unwrap_err();
    assert!(matches!(err, StoreError::Induced(_)));
    assert_eq!(err.to_string(), "inducing failure for create ConfigMap");
    assert_eq!(store.created::<ConfigMap>().len(), 1);
    assert!(store.peek::<ConfigMap>(&ObjectKey::new("ns", "a")).is_none());
}

#[tokio::test]
async fn delete_records_key_and_notifies_watchers() {
    let store = MemoryStore::new().with(&cm("ns", "a", &[]));
    let mut events = store.watch::<ConfigMap>("ns");
    store.delete::<ConfigMap>(&ObjectKey::new("ns", "a")).await.unwrap();
    assert_eq!(store.deleted::<ConfigMap>(), vec![ObjectKey::new("ns", "a")]);
    match events.next().await.unwrap().unwrap() {
        WatchEvent::Deleted(c) => assert_eq!(c.metadata.name.as_deref(), Some("a")),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(store.mutations(), 1);
}
