#![forbid(unsafe_code)]

mod common;

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Container as PodContainer, PodSpec, PodTemplateSpec};
use riff_controllers::processor;
use riff_core::{ConditionStatus, READY};
use riff_runtime::{reference_of, reference_to, Reconciler};
use riff_schema::build::{Container, ContainerSpec};
use riff_schema::keda::ScaledObject;
use riff_schema::streaming::{
    Build, InputStreamBinding, Processor, ProcessorSpec, DEPLOYMENT_READY, SCALED_OBJECT_READY, STREAMS_READY,
};
use riff_schema::Parent;
use riff_store::{MemoryStore, Verb};

use common::*;

const PROCESSOR_IMAGE: &str = "test-processor-image@sha256:faa5";

fn processor(build: Option<Build>, default_image: Option<&str>) -> Processor {
    stamp(Processor::new("test-processor", ProcessorSpec {
        build,
        template: Some(PodTemplateSpec {
            metadata: None,
            spec: Some(PodSpec {
                containers: vec![PodContainer {
                    name: "test-container".into(),
                    image: default_image.map(str::to_string),
                    ..Default::default()
                }],
                ..Default::default()
            }),
        }),
        inputs: vec![InputStreamBinding { stream: "numbers".into(), ..Default::default() }],
        ..Default::default()
    }))
}

fn images_map() -> ConfigMap { config_map(NS, "riff-streaming-processor", &[("processorImage", PROCESSOR_IMAGE)]) }

async fn reconcile(store: &Arc<MemoryStore>) -> Result<(), riff_runtime::Error> {
    processor::reconciler(&common::context(store)).reconcile(&key("test-processor")).await
}

#[tokio::test]
async fn processor_gets_a_deployment_and_scaled_object() {
    let p = processor(None, Some(&image("default")));
    let store = Arc::new(MemoryStore::new().with(&p).with(&images_map()));
    let ctx = common::context(&store);
    processor::reconciler(&ctx).reconcile(&key("test-processor")).await.unwrap();

    let deployments = store.created::<Deployment>();
    assert_eq!(deployments.len(), 1);
    let pod = deployments[0].spec.as_ref().unwrap().template.spec.clone().unwrap();
    assert_eq!(pod.containers[0].image.as_deref(), Some(image("default").as_str()));
    assert_eq!(pod.containers[1].image.as_deref(), Some(PROCESSOR_IMAGE));

    let scaled = store.created::<ScaledObject>();
    assert_eq!(scaled.len(), 1);
    assert_eq!(scaled[0].spec.scale_target_ref.deployment_name, "test-processor-processor-001");
    assert_eq!(scaled[0].spec.triggers[0].type_, "liiklus");

    let p: Processor = last_status(&store);
    let status = p.status().unwrap();
    assert_eq!(status.latest_image.as_deref(), Some(image("default").as_str()));
    assert_eq!(status.deployment_ref.as_ref().unwrap().name, "test-processor-processor-001");
    assert_eq!(status.scaled_object_ref.as_ref().unwrap().name, "test-processor-processor-002");
    assert_eq!(status_of(&p, STREAMS_READY), Some(ConditionStatus::True));
    assert_eq!(status_of(&p, SCALED_OBJECT_READY), Some(ConditionStatus::True));
    assert_eq!(status_of(&p, DEPLOYMENT_READY), Some(ConditionStatus::Unknown));
    assert_eq!(status_of(&p, READY), Some(ConditionStatus::Unknown));

    let tracked = ctx.tracker.lookup(&reference_to::<ConfigMap>(&key("riff-streaming-processor")));
    assert_eq!(tracked, vec![reference_of(&p)]);

    store.clear_actions();
    processor::reconciler(&ctx).reconcile(&key("test-processor")).await.unwrap();
    assert!(store.actions().is_empty(), "second pass converges");
}

#[tokio::test]
async fn missing_images_map_is_an_error() {
    let store = Arc::new(MemoryStore::new().with(&processor(None, Some("img"))));
    let err = reconcile(&store).await.unwrap_err();
    assert_eq!(err.to_string(), r#"configmaps "riff-streaming-processor" not found"#);

    let p: Processor = last_status(&store);
    for c in [STREAMS_READY, DEPLOYMENT_READY, SCALED_OBJECT_READY, READY] {
        assert_eq!(status_of(&p, c), Some(ConditionStatus::Unknown), "{c}");
    }
}

#[tokio::test]
async fn missing_sidecar_image_is_an_error() {
    let store = Arc::new(
        MemoryStore::new().with(&processor(None, Some("img"))).with(&config_map(NS, "riff-streaming-processor", &[])),
    );
    let err = reconcile(&store).await.unwrap_err();
    assert!(err.to_string().contains("missing processor image configuration"));
    let p: Processor = last_status(&store);
    assert_eq!(p.status().unwrap().latest_image.as_deref(), Some("img"));
    assert_eq!(store.mutations(), 0);
}

#[tokio::test]
async fn no_image_at_all_is_an_error() {
    let store = Arc::new(MemoryStore::new().with(&processor(None, None)).with(&images_map()));
    let err = reconcile(&store).await.unwrap_err();
    assert!(err.to_string().contains("could not resolve an image"));
}

#[tokio::test]
async fn container_build_wins_over_the_template() {
    let mut c = stamp(Container::new("test-container", ContainerSpec::default()));
    c.status = Some(built(&image("test-container")));
    let p = processor(Some(Build { container_ref: "test-container".into(), ..Default::default() }), Some("ignored"));
    let store = Arc::new(MemoryStore::new().with(&p).with(&c).with(&images_map()));
    reconcile(&store).await.unwrap();

    let pod = store.created::<Deployment>()[0].spec.clone().unwrap().template.spec.unwrap();
    assert_eq!(pod.containers[0].image.as_deref(), Some(image("test-container").as_str()));
}

#[tokio::test]
async fn missing_build_waits() {
    let p = processor(Some(Build { function_ref: "test-function".into(), ..Default::default() }), None);
    let store = Arc::new(MemoryStore::new().with(&p).with(&images_map()));
    reconcile(&store).await.unwrap();
    assert_eq!(store.mutations(), 0);
}

#[tokio::test]
async fn failed_scaled_object_create_keeps_the_deployment_ref() {
    let store = Arc::new(MemoryStore::new().with(&processor(None, Some("img"))).with(&images_map()));
    store.fail_on::<ScaledObject>(Verb::Create);
    assert!(reconcile(&store).await.is_err());

    let p: Processor = last_status(&store);
    assert_eq!(p.status().unwrap().deployment_ref.as_ref().unwrap().name, "test-processor-processor-001");
    assert!(p.status().unwrap().scaled_object_ref.is_none());
    assert_eq!(status_of(&p, SCALED_OBJECT_READY), Some(ConditionStatus::Unknown));
}
