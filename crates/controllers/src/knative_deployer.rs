//! Knative Deployer: a serving Configuration for the image plus a Route of the
//! same name sending all traffic to it.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, PodTemplateSpec};
use kube::api::ObjectMeta;
use kube::ResourceExt;
use riff_apply::{not_owned_message, reconcile_child, ChildOutcome, NOT_OWNED};
use riff_core::labels;
use riff_kubehub::{LabelSelector, ObjectStore};
use riff_runtime::{Controller, Error, ParentReconciler, ParentSync};
use riff_schema::build::{Application, Container, Function};
use riff_schema::knative::{Deployer, IngressPolicy, CONFIGURATION_READY, ROUTE_READY};
use riff_schema::serving::{
    Configuration, ConfigurationSpec, RevisionSpec, RevisionTemplateSpec, Route, RouteSpec, TrafficTarget,
};
use riff_schema::{ref_to, Parent};
use tracing::debug;

use crate::resolve::{self, BuildRef};
use crate::Context;

fn child_labels(parent: &Deployer) -> BTreeMap<String, String> {
    let mut l = parent.labels().clone();
    l.insert(labels::KNATIVE_DEPLOYER.to_string(), parent.name_any());
    if parent.spec.ingress_policy == IngressPolicy::ClusterLocal {
        l.insert(labels::KNATIVE_VISIBILITY.to_string(), labels::KNATIVE_CLUSTER_LOCAL.to_string());
    }
    l
}

fn child_annotations(parent: &Deployer) -> BTreeMap<String, String> {
    let mut a = parent.annotations().clone();
    if let Some(min) = parent.spec.scale.min {
        a.insert(labels::MIN_SCALE_ANNOTATION.to_string(), min.to_string());
    }
    if let Some(max) = parent.spec.scale.max {
        a.insert(labels::MAX_SCALE_ANNOTATION.to_string(), max.to_string());
    }
    a
}

pub(crate) fn desired_configuration(parent: &Deployer, image: &str) -> Configuration {
    let labels = child_labels(parent);
    let annotations = child_annotations(parent);
    let PodTemplateSpec { metadata, spec } = parent.spec.template.clone().unwrap_or_default();
    let mut template = RevisionTemplateSpec {
        metadata: metadata.unwrap_or_default(),
        spec: RevisionSpec { pod: spec.unwrap_or_default(), ..Default::default() },
    };
    template.labels_mut().extend(labels.clone());
    template.annotations_mut().extend(annotations.clone());
    if template.user_container().is_none() {
        template.spec.pod.containers.push(Default::default());
    }
    if let Some(c) = template.user_container_mut() {
        c.image = Some(image.to_string());
    }

    let mut configuration = Configuration::new("", ConfigurationSpec { template });
    configuration.metadata = ObjectMeta {
        generate_name: Some(format!("{}-deployer-", parent.name_any())),
        labels: Some(labels),
        annotations: (!annotations.is_empty()).then_some(annotations),
        ..Default::default()
    };
    configuration
}

pub(crate) fn desired_route(parent: &Deployer, configuration: &str) -> Route {
    let mut route = Route::new(&parent.name_any(), RouteSpec {
        traffic: vec![TrafficTarget {
            configuration_name: Some(configuration.to_string()),
            percent: Some(100),
            ..Default::default()
        }],
    });
    route.metadata.labels = Some(child_labels(parent));
    route
}

pub struct DeployerSync<S> {
    ctx: Context<S>,
}

#[async_trait]
impl<S: ObjectStore> ParentSync for DeployerSync<S> {
    type Parent = Deployer;

    async fn sync(&self, parent: &mut Deployer) -> Result<(), Error> {
        let spec = parent.spec.clone();
        let build = spec.build.as_ref().and_then(|b| BuildRef::first(&b.application_ref, &b.function_ref, &b.container_ref));
        let Some(image) = resolve::runtime_image(&self.ctx, &*parent, build, spec.template.as_ref()).await? else {
            if build.is_none() {
                return Err(Error::invalid("could not resolve an image"));
            }
            debug!(deployer = %parent.name_any(), "build reference not found; waiting");
            return Ok(());
        };
        parent.status_mut().latest_image = Some(image.clone());

        let selector = LabelSelector::eq(labels::KNATIVE_DEPLOYER, parent.name_any());
        let store = &*self.ctx.store;

        let current = parent.status().and_then(|s| s.configuration_ref.as_ref()).map(|r| r.name.clone());
        let desired = desired_configuration(parent, &image);
        let configuration = match reconcile_child(store, &*parent, &selector, Some(desired), current.as_deref()).await? {
            ChildOutcome::NotOwned { name } => {
                parent.status_mut().configuration_ref = None;
                let msg = not_owned_message::<Configuration, Deployer>(&name);
                parent.manage().mark_false(CONFIGURATION_READY, NOT_OWNED, msg);
                return Ok(());
            }
            ChildOutcome::Live(None) => return Ok(()),
            ChildOutcome::Live(Some(c)) => c,
        };
        parent.status_mut().configuration_ref = Some(ref_to::<Configuration>(&configuration.name_any()));
        parent.manage().propagate(CONFIGURATION_READY, configuration.ready_condition());

        let current = parent.status().and_then(|s| s.route_ref.as_ref()).map(|r| r.name.clone());
        let desired = desired_route(parent, &configuration.name_any());
        match reconcile_child(store, &*parent, &selector, Some(desired), current.as_deref()).await? {
            ChildOutcome::NotOwned { name } => {
                let status = parent.status_mut();
                status.route_ref = None;
                status.address = None;
                status.url = None;
                parent.manage().mark_false(ROUTE_READY, NOT_OWNED, not_owned_message::<Route, Deployer>(&name));
            }
            ChildOutcome::Live(None) => {}
            ChildOutcome::Live(Some(route)) => {
                let routed = route.status.clone().unwrap_or_default();
                let status = parent.status_mut();
                status.route_ref = Some(ref_to::<Route>(&route.name_any()));
                status.address = routed.address;
                status.url = routed.url;
                parent.manage().propagate(ROUTE_READY, route.ready_condition());
            }
        }
        Ok(())
    }
}

pub fn reconciler<S: ObjectStore>(ctx: &Context<S>) -> ParentReconciler<S, DeployerSync<S>> {
    ParentReconciler::new("knative-deployer", Arc::clone(&ctx.store), DeployerSync { ctx: ctx.clone() })
}

pub fn controller<S: ObjectStore>(ctx: &Context<S>) -> Controller<S> {
    Controller::new(Arc::clone(&ctx.store), Arc::new(reconciler(ctx)), Arc::clone(&ctx.tracker))
        .for_kind::<Deployer>()
        .owns::<Configuration>()
        .owns::<Route>()
        .tracks::<ConfigMap>()
        .tracks::<Application>()
        .tracks::<Function>()
        .tracks::<Container>()
}
