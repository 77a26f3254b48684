#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, Service, ServicePort, ServiceSpec};
use kube::api::ObjectMeta;
use riff_apply::{not_owned_message, reconcile_child, ChildOutcome, LAST_APPLIED};
use riff_core::ObjectKey;
use riff_kubehub::LabelSelector;
use riff_runtime::set_controller;
use riff_schema::build::{Application, ApplicationSpec};
use riff_store::{MemoryStore, Verb};

const LABEL: &str = "application.build.projectriff.io";

fn parent() -> Application {
    let mut a = Application::new("test-application", ApplicationSpec::default());
    a.metadata.namespace = Some("test-namespace".into());
    a.metadata.uid = Some("parent-uid".into());
    a
}

fn selector() -> LabelSelector { LabelSelector::eq(LABEL, "test-application") }

fn labels(extra: &[(&str, &str)]) -> Option<BTreeMap<String, String>> {
    let mut m = BTreeMap::from([(LABEL.to_string(), "test-application".to_string())]);
    m.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    Some(m)
}

fn desired_cm(value: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta { generate_name: Some("test-application-application-".into()), labels: labels(&[]), ..Default::default() },
        data: Some(BTreeMap::from([("k".to_string(), value.to_string())])),
        ..Default::default()
    }
}

fn owned_cm(name: &str, value: &str) -> ConfigMap {
    let mut c = desired_cm(value);
    c.metadata.generate_name = None;
    c.metadata.name = Some(name.into());
    c.metadata.namespace = Some("test-namespace".into());
    set_controller(&mut c.metadata, &parent());
    c
}

fn fixed_service(owned: bool) -> Service {
    let mut s = Service {
        metadata: ObjectMeta {
            name: Some("test-application".into()),
            namespace: Some("test-namespace".into()),
            labels: labels(&[]),
            ..Default::default()
        },
        spec: Some(ServiceSpec { ports: Some(vec![ServicePort { port: 80, ..Default::default() }]), ..Default::default() }),
        ..Default::default()
    };
    if owned {
        set_controller(&mut s.metadata, &parent());
    }
    s
}

#[tokio::test]
async fn creates_when_nothing_is_owned() {
    let store = MemoryStore::new();
    let out = reconcile_child(&store, &parent(), &selector(), Some(desired_cm("v")), None).await.unwrap();
    let live = out.live().unwrap();
    assert_eq!(live.metadata.name.as_deref(), Some("test-application-application-001"));
    let created = store.created::<ConfigMap>();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].metadata.namespace.as_deref(), Some("test-namespace"));
    let owner = &created[0].metadata.owner_references.as_ref().unwrap()[0];
    assert_eq!((owner.kind.as_str(), owner.uid.as_str()), ("Application", "parent-uid"));
}

#[tokio::test]
async fn second_pass_is_a_no_op() {
    let store = MemoryStore::new();
    reconcile_child(&store, &parent(), &selector(), Some(desired_cm("v")), None).await.unwrap();
    store.clear_actions();
    let out = reconcile_child(&store, &parent(), &selector(), Some(desired_cm("v")), None).await.unwrap();
    assert!(out.live().is_some());
    assert_eq!(store.mutations(), 0);
}

#[tokio::test]
async fn drifted_child_is_updated_in_place() {
    let store = MemoryStore::new().with(&owned_cm("test-application-application-001", "old"));
    let out = reconcile_child(&store, &parent(), &selector(), Some(desired_cm("new")), None).await.unwrap();
    let updated = store.updated::<ConfigMap>();
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].metadata.name.as_deref(), Some("test-application-application-001"));
    assert_eq!(updated[0].data.as_ref().unwrap()["k"], "new");
    assert_eq!(out.live().unwrap().data.as_ref().unwrap()["k"], "new");
}

#[tokio::test]
async fn undesired_child_is_deleted() {
    let store = MemoryStore::new().with(&owned_cm("old-001", "v"));
    let out = reconcile_child::<_, _, ConfigMap>(&store, &parent(), &selector(), None, None).await.unwrap();
    assert_eq!(out, ChildOutcome::Live(None));
    assert_eq!(store.deleted::<ConfigMap>(), vec![ObjectKey::new("test-namespace", "old-001")]);
}

#[tokio::test]
async fn extras_without_a_current_ref_are_replaced() {
    let store = MemoryStore::new().with(&owned_cm("extra2", "v")).with(&owned_cm("extra1", "v"));
    reconcile_child(&store, &parent(), &selector(), Some(desired_cm("v")), None).await.unwrap();
    assert_eq!(
        store.deleted::<ConfigMap>(),
        vec![ObjectKey::new("test-namespace", "extra1"), ObjectKey::new("test-namespace", "extra2")]
    );
    assert_eq!(store.created::<ConfigMap>().len(), 1);
}

#[tokio::test]
async fn current_ref_survives_extras() {
    let store = MemoryStore::new().with(&owned_cm("extra1", "v")).with(&owned_cm("extra2", "v"));
    let out = reconcile_child(&store, &parent(), &selector(), Some(desired_cm("v")), Some("extra2")).await.unwrap();
    assert_eq!(out.live().unwrap().metadata.name.as_deref(), Some("extra2"));
    assert_eq!(store.deleted::<ConfigMap>(), vec![ObjectKey::new("test-namespace", "extra1")]);
    assert!(store.created::<ConfigMap>().is_empty());
}

#[tokio::test]
async fn delete_failure_stops_the_pass() {
    let store = MemoryStore::new().with(&owned_cm("extra1", "v")).with(&owned_cm("extra2", "v"));
    store.fail_on::<ConfigMap>(Verb::Delete);
    let err = reconcile_child(&store, &parent(), &selector(), Some(desired_cm("v")), None).await.unwrap_err();
    assert_eq!(err.to_string(), "inducing failure for delete ConfigMap");
    assert_eq!(store.deleted::<ConfigMap>().len(), 1);
    assert!(store.created::<ConfigMap>().is_empty());
}

#[tokio::test]
async fn foreign_child_with_the_fixed_name_is_not_owned() {
    let store = MemoryStore::new().with(&fixed_service(false));
    let mut desired = fixed_service(false);
    desired.metadata.namespace = None;
    let out = reconcile_child(&store, &parent(), &selector(), Some(desired), None).await.unwrap();
    assert_eq!(out, ChildOutcome::NotOwned { name: "test-application".into() });
    assert_eq!(store.mutations(), 0);
    assert_eq!(
        not_owned_message::<Service, Application>("test-application"),
        "There is an existing Service \"test-application\" that the Application does not own."
    );
}

#[tokio::test]
async fn create_collision_outside_the_selector_is_not_owned() {
    let mut foreign = fixed_service(false);
    foreign.metadata.labels = None;
    let store = MemoryStore::new().with(&foreign);
    let out = reconcile_child(&store, &parent(), &selector(), Some(fixed_service(false)), None).await.unwrap();
    assert_eq!(out, ChildOutcome::NotOwned { name: "test-application".into() });
    assert_eq!(store.created::<Service>().len(), 1);
    assert!(store.updated::<Service>().is_empty());
}

#[tokio::test]
async fn owned_fixed_name_child_is_adopted_then_kept() {
    let store = MemoryStore::new().with(&fixed_service(true));
    let out = reconcile_child(&store, &parent(), &selector(), Some(fixed_service(false)), None).await.unwrap();
    assert!(out.live().is_some());
    assert!(store.created::<Service>().is_empty());
    let updated = store.updated::<Service>();
    assert_eq!(updated.len(), 1, "a child without a last-applied record is stamped once");
    assert!(updated[0].metadata.annotations.as_ref().unwrap().contains_key(LAST_APPLIED));

    store.clear_actions();
    reconcile_child(&store, &parent(), &selector(), Some(fixed_service(false)), None).await.unwrap();
    assert_eq!(store.mutations(), 0);
}

fn annotated_cm(value: &str, annotations: &[(&str, &str)]) -> ConfigMap {
    let mut c = desired_cm(value);
    c.metadata.annotations = Some(annotations.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect());
    c
}

#[tokio::test]
async fn annotation_dropped_from_desired_is_removed() {
    let store = MemoryStore::new();
    let scaled = annotated_cm("v", &[("autoscaling.knative.dev/minScale", "1")]);
    reconcile_child(&store, &parent(), &selector(), Some(scaled), None).await.unwrap();

    let key = ObjectKey::new("test-namespace", "test-application-application-001");
    let mut live = store.peek::<ConfigMap>(&key).unwrap();
    live.metadata.annotations.as_mut().unwrap().insert("someone.else/note".into(), "kept".into());
    store.seed(&live);
    store.clear_actions();

    let out = reconcile_child(&store, &parent(), &selector(), Some(annotated_cm("v", &[])), Some("test-application-application-001"))
        .await
        .unwrap();
    assert_eq!(store.updated::<ConfigMap>().len(), 1);
    let ann = out.live().unwrap().metadata.annotations.clone().unwrap();
    assert!(!ann.contains_key("autoscaling.knative.dev/minScale"));
    assert_eq!(ann["someone.else/note"], "kept");

    store.clear_actions();
    reconcile_child(&store, &parent(), &selector(), Some(annotated_cm("v", &[])), None).await.unwrap();
    assert_eq!(store.mutations(), 0);
}

#[tokio::test]
async fn field_dropped_from_desired_is_removed() {
    let store = MemoryStore::new();
    reconcile_child(&store, &parent(), &selector(), Some(desired_cm("v")), None).await.unwrap();
    store.clear_actions();

    let mut bare = desired_cm("v");
    bare.data = None;
    let out = reconcile_child(&store, &parent(), &selector(), Some(bare), None).await.unwrap();
    assert_eq!(store.updated::<ConfigMap>().len(), 1);
    assert!(out.live().unwrap().data.is_none());
}
