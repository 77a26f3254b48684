//! Streaming Processor: the function container plus a stream-binding sidecar
//! in one Deployment, scaled on stream lag by a KEDA ScaledObject.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{ConfigMap, Container as PodContainer, ContainerPort, EnvVar, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector as MetaSelector;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use riff_apply::{not_owned_message, reconcile_child, ChildOutcome, NOT_OWNED};
use riff_core::{labels, settings, ObjectKey};
use riff_kubehub::{LabelSelector, ObjectStore};
use riff_runtime::{Controller, Error, ParentReconciler, ParentSync};
use riff_schema::build::{Container, Function};
use riff_schema::keda::{ScaleTarget, ScaleTriggers, ScaledObject, ScaledObjectSpec};
use riff_schema::streaming::{Processor, DEPLOYMENT_READY, SCALED_OBJECT_READY, STREAMS_READY};
use riff_schema::{ref_to, Parent};
use tracing::debug;

use crate::core_deployer::available;
use crate::resolve::{self, BuildRef};
use crate::Context;

const FUNCTION_PORT: i32 = 8081;
const BINDINGS_PATH: &str = "/var/riff/bindings";

const POLLING_INTERVAL: i32 = 1;
const COOLDOWN_PERIOD: i32 = 30;
const MIN_REPLICAS: i32 = 1;
const MAX_REPLICAS: i32 = 30;

fn child_labels(parent: &Processor) -> BTreeMap<String, String> {
    let mut l = parent.labels().clone();
    l.insert(labels::PROCESSOR.to_string(), parent.name_any());
    l
}

fn env(name: &str, value: String) -> EnvVar {
    EnvVar { name: name.to_string(), value: (!value.is_empty()).then_some(value), ..Default::default() }
}

/// The sidecar that moves messages between streams and the function.
fn processor_container(parent: &Processor, image: &str) -> PodContainer {
    let inputs = &parent.spec.inputs;
    let join = |v: Vec<&str>| v.join(",");
    PodContainer {
        name: "processor".into(),
        image: Some(image.to_string()),
        image_pull_policy: Some("IfNotPresent".into()),
        env: Some(vec![
            env("CNB_BINDINGS", BINDINGS_PATH.into()),
            env("INPUT_START_OFFSETS", join(inputs.iter().map(|i| i.start_offset()).collect())),
            env("INPUT_NAMES", join(inputs.iter().map(|i| i.alias()).collect())),
            env("OUTPUT_NAMES", join(parent.spec.outputs.iter().map(|o| o.alias()).collect())),
            env("GROUP", parent.name_any()),
            env("FUNCTION", format!("localhost:{FUNCTION_PORT}")),
        ]),
        ..Default::default()
    }
}

pub(crate) fn desired_deployment(parent: &Processor, image: &str, processor_image: &str) -> Deployment {
    let labels = child_labels(parent);
    let PodTemplateSpec { metadata, spec } = parent.spec.template.clone().unwrap_or_default();
    let mut metadata = metadata.unwrap_or_default();
    metadata.labels.get_or_insert_with(BTreeMap::new).extend(labels.clone());
    let mut pod = spec.unwrap_or_default();

    let mut function = pod.containers.first().cloned().unwrap_or_default();
    if function.name.is_empty() {
        function.name = "function".into();
    }
    function.image = Some(image.to_string());
    function.ports = Some(vec![ContainerPort { container_port: FUNCTION_PORT, ..Default::default() }]);
    pod.containers = vec![function, processor_container(parent, processor_image)];

    Deployment {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-processor-", parent.name_any())),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: MetaSelector {
                match_labels: Some(BTreeMap::from([(labels::PROCESSOR.to_string(), parent.name_any())])),
                match_expressions: None,
            },
            template: PodTemplateSpec { metadata: Some(metadata), spec: Some(pod) },
            ..Default::default()
        }),
        status: None,
    }
}

pub(crate) fn desired_scaled_object(parent: &Processor, deployment: &str) -> ScaledObject {
    let mut l = child_labels(parent);
    l.insert(labels::DEPLOYMENT_NAME.to_string(), deployment.to_string());
    let triggers = parent
        .spec
        .inputs
        .iter()
        .map(|i| ScaleTriggers {
            type_: "liiklus".into(),
            name: None,
            metadata: BTreeMap::from([
                ("topic".to_string(), i.stream.clone()),
                ("group".to_string(), parent.name_any()),
            ]),
        })
        .collect();
    let mut so = ScaledObject::new("", ScaledObjectSpec {
        scale_target_ref: ScaleTarget { deployment_name: deployment.to_string(), container_name: None },
        polling_interval: Some(POLLING_INTERVAL),
        cooldown_period: Some(COOLDOWN_PERIOD),
        min_replica_count: Some(MIN_REPLICAS),
        max_replica_count: Some(MAX_REPLICAS),
        triggers,
    });
    so.metadata = ObjectMeta {
        generate_name: Some(format!("{}-processor-", parent.name_any())),
        labels: Some(l),
        ..Default::default()
    };
    so
}

pub struct ProcessorSync<S> {
    ctx: Context<S>,
}

#[async_trait]
impl<S: ObjectStore> ParentSync for ProcessorSync<S> {
    type Parent = Processor;

    async fn sync(&self, parent: &mut Processor) -> Result<(), Error> {
        let key = ObjectKey::new(parent.namespace().unwrap_or_default(), settings::PROCESSOR);
        let images = resolve::settings_map(&self.ctx, &key, &*parent).await?;

        let spec = parent.spec.clone();
        let build = spec.build.as_ref().and_then(|b| BuildRef::first("", &b.function_ref, &b.container_ref));
        let Some(image) = resolve::runtime_image(&self.ctx, &*parent, build, spec.template.as_ref()).await? else {
            if build.is_none() {
                return Err(Error::invalid("could not resolve an image"));
            }
            debug!(processor = %parent.name_any(), "build reference not found; waiting");
            return Ok(());
        };
        parent.status_mut().latest_image = Some(image.clone());

        let Some(processor_image) = resolve::data(&images, settings::PROCESSOR_IMAGE_KEY) else {
            return Err(Error::invalid("missing processor image configuration"));
        };

        let selector = LabelSelector::eq(labels::PROCESSOR, parent.name_any());
        let store = &*self.ctx.store;

        let current = parent.status().and_then(|s| s.deployment_ref.as_ref()).map(|r| r.name.clone());
        let desired = desired_deployment(parent, &image, processor_image);
        let deployment = match reconcile_child(store, &*parent, &selector, Some(desired), current.as_deref()).await? {
            ChildOutcome::NotOwned { name } => {
                parent.status_mut().deployment_ref = None;
                let msg = not_owned_message::<Deployment, Processor>(&name);
                parent.manage().mark_false(DEPLOYMENT_READY, NOT_OWNED, msg);
                return Ok(());
            }
            ChildOutcome::Live(None) => return Ok(()),
            ChildOutcome::Live(Some(d)) => d,
        };
        parent.status_mut().deployment_ref = Some(ref_to::<Deployment>(&deployment.name_any()));
        parent.manage().mark_true(STREAMS_READY);
        parent.manage().propagate(DEPLOYMENT_READY, available(&deployment).as_ref());

        let current = parent.status().and_then(|s| s.scaled_object_ref.as_ref()).map(|r| r.name.clone());
        let desired = desired_scaled_object(parent, &deployment.name_any());
        match reconcile_child(store, &*parent, &selector, Some(desired), current.as_deref()).await? {
            ChildOutcome::NotOwned { name } => {
                parent.status_mut().scaled_object_ref = None;
                let msg = not_owned_message::<ScaledObject, Processor>(&name);
                parent.manage().mark_false(SCALED_OBJECT_READY, NOT_OWNED, msg);
            }
            ChildOutcome::Live(None) => {}
            ChildOutcome::Live(Some(so)) => {
                parent.status_mut().scaled_object_ref = Some(ref_to::<ScaledObject>(&so.name_any()));
                parent.manage().mark_true(SCALED_OBJECT_READY);
            }
        }
        Ok(())
    }
}

pub fn reconciler<S: ObjectStore>(ctx: &Context<S>) -> ParentReconciler<S, ProcessorSync<S>> {
    ParentReconciler::new("processor", Arc::clone(&ctx.store), ProcessorSync { ctx: ctx.clone() })
}

pub fn controller<S: ObjectStore>(ctx: &Context<S>) -> Controller<S> {
    Controller::new(Arc::clone(&ctx.store), Arc::new(reconciler(ctx)), Arc::clone(&ctx.tracker))
        .for_kind::<Processor>()
        .owns::<Deployment>()
        .owns::<ScaledObject>()
        .tracks::<ConfigMap>()
        .tracks::<Function>()
        .tracks::<Container>()
}
