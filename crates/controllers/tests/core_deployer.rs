#![forbid(unsafe_code)]

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentCondition, DeploymentStatus};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container as PodContainer, PodSpec, PodTemplateSpec, ResourceRequirements, Service,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::api::networking::v1::Ingress;
use riff_controllers::core_deployer;
use riff_core::{ConditionSeverity, ConditionStatus, ObjectKey, READY};
use riff_kubehub::StoreError;
use riff_runtime::{reference_of, reference_to, Reconciler};
use riff_schema::build::{Application, ApplicationSpec};
use riff_schema::core_deployer::{
    Build, Deployer, DeployerSpec, DeployerStatus, IngressPolicy, DEPLOYMENT_READY, INGRESS_READY, SERVICE_READY,
};
use riff_schema::Parent;
use riff_store::{MemoryStore, Verb};

use common::*;

fn deployer(policy: IngressPolicy) -> Deployer {
    stamp(Deployer::new("test-deployer", DeployerSpec {
        build: Some(Build { application_ref: "my-application".into(), ..Default::default() }),
        ingress_policy: policy,
        ..Default::default()
    }))
}

fn application() -> Application {
    let mut app = stamp(Application::new("my-application", ApplicationSpec::default()));
    app.status = Some(built(&image("my-application")));
    app
}

fn core_settings(data: &[(&str, &str)]) -> ConfigMap { config_map("riff-system", "riff-core-settings", data) }

fn store_with(d: &Deployer) -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new().with(d).with(&application()).with(&core_settings(&[])))
}

async fn reconcile(store: &Arc<MemoryStore>) -> Result<(), riff_runtime::Error> {
    core_deployer::reconciler(&common::context(store)).reconcile(&key("test-deployer")).await
}

#[tokio::test]
async fn cluster_local_deployer_gets_a_deployment_and_service() {
    let store = store_with(&deployer(IngressPolicy::ClusterLocal));
    let ctx = common::context(&store);
    core_deployer::reconciler(&ctx).reconcile(&key("test-deployer")).await.unwrap();

    let deployments = store.created::<Deployment>();
    assert_eq!(deployments.len(), 1);
    assert_eq!(deployments[0].metadata.generate_name.as_deref(), Some("test-deployer-deployer-"));
    let pod = deployments[0].spec.as_ref().unwrap().template.spec.clone().unwrap();
    assert_eq!(pod.containers[0].image.as_deref(), Some(image("my-application").as_str()));
    let services = store.created::<Service>();
    assert_eq!(services[0].metadata.name.as_deref(), Some("test-deployer"));
    assert!(store.created::<Ingress>().is_empty());

    let d: Deployer = last_status(&store);
    let status = d.status().unwrap();
    assert_eq!(status.latest_image.as_deref(), Some(image("my-application").as_str()));
    assert_eq!(status.deployment_ref.as_ref().unwrap().name, "test-deployer-deployer-001");
    assert_eq!(status.service_ref.as_ref().unwrap().name, "test-deployer");
    assert!(status.ingress_ref.is_none());
    assert_eq!(
        status.address.as_ref().unwrap().url.as_deref(),
        Some("http://test-deployer.test-namespace.svc.cluster.local")
    );
    assert_eq!(status.url, None);
    assert_eq!(status_of(&d, DEPLOYMENT_READY), Some(ConditionStatus::Unknown));
    assert_eq!(status_of(&d, SERVICE_READY), Some(ConditionStatus::True));
    assert_eq!(status_of(&d, READY), Some(ConditionStatus::Unknown));
    let ingress = condition(&d, INGRESS_READY).unwrap();
    assert_eq!((ingress.status, ingress.reason.as_str()), (ConditionStatus::False, "IngressNotRequired"));
    assert_eq!(ingress.severity, ConditionSeverity::Info);

    let dependent = reference_of(&deployer(IngressPolicy::ClusterLocal));
    let settings = reference_to::<ConfigMap>(&ObjectKey::new("riff-system", "riff-core-settings"));
    assert_eq!(ctx.tracker.lookup(&settings), vec![dependent.clone()]);
    assert_eq!(ctx.tracker.lookup(&reference_to::<Application>(&key("my-application"))), vec![dependent]);
}

#[tokio::test]
async fn available_deployment_makes_the_deployer_ready() {
    let store = store_with(&deployer(IngressPolicy::ClusterLocal));
    reconcile(&store).await.unwrap();

    let mut deployment = store.peek::<Deployment>(&key("test-deployer-deployer-001")).unwrap();
    deployment.status = Some(DeploymentStatus {
        conditions: Some(vec![DeploymentCondition {
            type_: "Available".into(),
            status: "True".into(),
            ..Default::default()
        }]),
        ..Default::default()
    });
    store.seed(&deployment);
    store.clear_actions();
    reconcile(&store).await.unwrap();

    assert_eq!(store.mutations(), 0);
    let d: Deployer = last_status(&store);
    assert_eq!(status_of(&d, DEPLOYMENT_READY), Some(ConditionStatus::True));
    assert_eq!(status_of(&d, READY), Some(ConditionStatus::True), "IngressReady=False must not block Ready");

    store.clear_actions();
    reconcile(&store).await.unwrap();
    assert!(store.actions().is_empty());
}

#[tokio::test]
async fn missing_settings_map_is_an_error() {
    let d = deployer(IngressPolicy::ClusterLocal);
    let store = Arc::new(MemoryStore::new().with(&d).with(&application()));
    let err = reconcile(&store).await.unwrap_err();
    assert!(err.to_string().contains("riff-core-settings"));

    let d: Deployer = last_status(&store);
    assert_eq!(status_of(&d, DEPLOYMENT_READY), Some(ConditionStatus::Unknown));
    assert_eq!(status_of(&d, SERVICE_READY), Some(ConditionStatus::Unknown));
    assert_eq!(status_of(&d, READY), Some(ConditionStatus::Unknown));
    assert_eq!(status_of(&d, INGRESS_READY), None);
    assert_eq!(store.mutations(), 0);
}

#[tokio::test]
async fn missing_build_waits_quietly() {
    let d = deployer(IngressPolicy::ClusterLocal);
    let store = Arc::new(MemoryStore::new().with(&d).with(&core_settings(&[])));
    reconcile(&store).await.unwrap();

    assert_eq!(store.mutations(), 0);
    let d: Deployer = last_status(&store);
    assert!(d.status().unwrap().latest_image.is_none());
    assert_eq!(status_of(&d, READY), Some(ConditionStatus::Unknown));
}

#[tokio::test]
async fn build_without_image_is_not_ready() {
    let d = deployer(IngressPolicy::ClusterLocal);
    let app = stamp(Application::new("my-application", ApplicationSpec::default()));
    let store = Arc::new(MemoryStore::new().with(&d).with(&app).with(&core_settings(&[])));
    assert!(reconcile(&store).await.is_err());
    assert_eq!(store.mutations(), 0);
}

#[tokio::test]
async fn external_deployer_gets_an_ingress_on_the_default_domain() {
    let d = deployer(IngressPolicy::External);
    let store = Arc::new(
        MemoryStore::new().with(&d).with(&application()).with(&core_settings(&[("defaultDomain", "riff.dev")])),
    );
    reconcile(&store).await.unwrap();

    let ingresses = store.created::<Ingress>();
    assert_eq!(ingresses.len(), 1);
    let rule = &ingresses[0].spec.as_ref().unwrap().rules.as_ref().unwrap()[0];
    assert_eq!(rule.host.as_deref(), Some("test-deployer.test-namespace.riff.dev"));

    let d: Deployer = last_status(&store);
    let status = d.status().unwrap();
    assert_eq!(status.ingress_ref.as_ref().unwrap().name, "test-deployer-deployer-002");
    assert_eq!(status.url.as_deref(), Some("http://test-deployer.test-namespace.riff.dev"));
    let ingress = condition(&d, INGRESS_READY).unwrap();
    assert_eq!((ingress.status, ingress.reason.as_str()), (ConditionStatus::Unknown, "IngressNotConfigured"));
    assert_eq!(ingress.message, "Ingress has not yet been reconciled.");
}

#[tokio::test]
async fn switching_to_cluster_local_removes_the_ingress() {
    let store = store_with(&deployer(IngressPolicy::External));
    reconcile(&store).await.unwrap();
    let ingress_name = last_status::<Deployer>(&store).status().unwrap().ingress_ref.clone().unwrap().name;

    let mut d = store.peek::<Deployer>(&key("test-deployer")).unwrap();
    d.spec.ingress_policy = IngressPolicy::ClusterLocal;
    store.seed(&d);
    store.clear_actions();
    reconcile(&store).await.unwrap();

    assert_eq!(store.deleted::<Ingress>(), vec![key(&ingress_name)]);
    let d: Deployer = last_status(&store);
    assert!(d.status().unwrap().ingress_ref.is_none());
    assert!(d.status().unwrap().url.is_none());
    assert_eq!(status_of(&d, INGRESS_READY), Some(ConditionStatus::False));
}

#[tokio::test]
async fn foreign_service_is_not_owned() {
    let d = deployer(IngressPolicy::External);
    let foreign = Service {
        metadata: kube::api::ObjectMeta { namespace: Some(NS.into()), name: Some("test-deployer".into()), ..Default::default() },
        ..Default::default()
    };
    let store = store_with(&d);
    store.seed(&foreign);
    reconcile(&store).await.unwrap();

    assert_eq!(store.created::<Service>().len(), 1, "one create is attempted and collides");
    assert!(store.updated::<Service>().is_empty());
    assert!(store.deleted::<Service>().is_empty());
    let stored = store.peek::<Service>(&key("test-deployer")).unwrap();
    assert!(stored.metadata.owner_references.is_none(), "the foreign service is left untouched");
    assert!(store.created::<Ingress>().is_empty(), "no ingress without an owned service");
    let d: Deployer = last_status(&store);
    let svc = condition(&d, SERVICE_READY).unwrap();
    assert_eq!(svc.status, ConditionStatus::False);
    assert_eq!(svc.reason, "NotOwned");
    assert_eq!(svc.message, r#"There is an existing Service "test-deployer" that the Deployer does not own."#);
    assert_eq!(status_of(&d, READY), Some(ConditionStatus::False));
}

#[tokio::test]
async fn failed_deployment_create_keeps_the_resolved_image() {
    let store = store_with(&deployer(IngressPolicy::ClusterLocal));
    store.fail_on::<Deployment>(Verb::Create);
    assert!(reconcile(&store).await.is_err());

    assert_eq!(store.created::<Deployment>().len(), 1, "the attempt is recorded");
    let d: Deployer = last_status(&store);
    assert_eq!(d.status().unwrap().latest_image.as_deref(), Some(image("my-application").as_str()));
    assert!(d.status().unwrap().deployment_ref.is_none());
    assert!(store.created::<Service>().is_empty());
}

#[tokio::test]
async fn drifted_service_is_restored() {
    let store = store_with(&deployer(IngressPolicy::ClusterLocal));
    reconcile(&store).await.unwrap();

    let mut svc = store.peek::<Service>(&key("test-deployer")).unwrap();
    svc.spec.as_mut().unwrap().ports.as_mut().unwrap()[0].port = 9999;
    store.seed(&svc);
    store.clear_actions();
    reconcile(&store).await.unwrap();

    let updated = store.updated::<Service>();
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].spec.as_ref().unwrap().ports.as_ref().unwrap()[0].port, 80);
}

#[tokio::test]
async fn removed_limits_leave_the_deployment() {
    let mut d = deployer(IngressPolicy::ClusterLocal);
    d.spec.template = Some(PodTemplateSpec {
        metadata: None,
        spec: Some(PodSpec {
            containers: vec![PodContainer {
                resources: Some(ResourceRequirements {
                    limits: Some(BTreeMap::from([("cpu".to_string(), Quantity("1".into()))])),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        }),
    });
    let store = store_with(&d);
    reconcile(&store).await.unwrap();

    let mut d = store.peek::<Deployer>(&key("test-deployer")).unwrap();
    d.spec.template = None;
    store.seed(&d);
    store.clear_actions();
    reconcile(&store).await.unwrap();

    let updated = store.updated::<Deployment>();
    assert_eq!(updated.len(), 1);
    let pod = updated[0].spec.clone().unwrap().template.spec.unwrap();
    assert!(pod.containers[0].resources.is_none(), "{:?}", pod.containers[0].resources);

    store.clear_actions();
    reconcile(&store).await.unwrap();
    assert_eq!(store.mutations(), 0);
}

#[tokio::test]
async fn colliding_ingress_clears_the_url() {
    let mut d = deployer(IngressPolicy::External);
    d.status = Some(DeployerStatus { url: Some("http://test-deployer.test-namespace.example.com".into()), ..Default::default() });
    let store = store_with(&d);
    store.fail_on_with::<Ingress>(Verb::Create, || StoreError::already_exists::<Ingress>("test-deployer-deployer-003"));
    reconcile(&store).await.unwrap();

    let d: Deployer = last_status(&store);
    assert!(d.status().unwrap().ingress_ref.is_none());
    assert!(d.status().unwrap().url.is_none(), "a url from an ingress we do not own is dropped");
    let ingress = condition(&d, INGRESS_READY).unwrap();
    assert_eq!((ingress.status, ingress.reason.as_str()), (ConditionStatus::False, "NotOwned"));
}
