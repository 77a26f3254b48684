//! Application and Function: resolve the target image and drive a kpack
//! Image build for resources that carry a git source.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, EnvVar, PersistentVolumeClaim};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use riff_apply::{not_owned_message, reconcile_child, ChildOutcome, NOT_OWNED};
use riff_core::{labels, settings};
use riff_kubehub::{LabelSelector, ObjectStore};
use riff_runtime::{Controller, Error, ParentReconciler, ParentSync};
use riff_schema::build::{Application, BuildStatus, Function, Source, IMAGE_RESOLVED, KPACK_IMAGE_READY};
use riff_schema::kpack::{self, Image, ImageBuild, ImageBuilder, ImageSpec, SourceConfig};
use riff_schema::{ref_to, Parent};
use tracing::debug;

use crate::{resolve, Context};

/// What distinguishes the build-plane kinds that produce images from source.
pub trait BuildParent: Parent<Status = BuildStatus> {
    const CONTROLLER: &'static str;
    /// Label carried by every child, valued with the parent's name.
    const LABEL: &'static str;
    /// Name of the kpack ClusterBuilder that builds this kind.
    const BUILDER: &'static str;

    fn image(&self) -> &str;
    fn source(&self) -> Option<&Source>;
    fn cache_size(&self) -> Option<&Quantity>;

    /// Extra environment for the build.
    fn build_env(&self) -> Vec<EnvVar> { Vec::new() }
}

impl BuildParent for Application {
    const CONTROLLER: &'static str = "application";
    const LABEL: &'static str = labels::APPLICATION;
    const BUILDER: &'static str = settings::APPLICATION_BUILDER;

    fn image(&self) -> &str { &self.spec.image }
    fn source(&self) -> Option<&Source> { self.spec.source.as_ref() }
    fn cache_size(&self) -> Option<&Quantity> { self.spec.cache_size.as_ref() }
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar { name: name.to_string(), value: Some(value.to_string()), ..Default::default() }
}

impl BuildParent for Function {
    const CONTROLLER: &'static str = "function";
    const LABEL: &'static str = labels::FUNCTION;
    const BUILDER: &'static str = settings::FUNCTION_BUILDER;

    fn image(&self) -> &str { &self.spec.image }
    fn source(&self) -> Option<&Source> { self.spec.source.as_ref() }
    fn cache_size(&self) -> Option<&Quantity> { self.spec.cache_size.as_ref() }

    fn build_env(&self) -> Vec<EnvVar> {
        vec![
            env("RIFF", "true"),
            env("RIFF_ARTIFACT", &self.spec.artifact),
            env("RIFF_HANDLER", &self.spec.handler),
            env("RIFF_OVERRIDE", &self.spec.invoker),
        ]
    }
}

/// The kpack Image that builds `parent` into `target`.
pub(crate) fn desired_image<P: BuildParent>(parent: &P, target: &str, source: &Source) -> Image {
    let name = parent.name_any();
    let mut child_labels = parent.labels().clone();
    child_labels.insert(P::LABEL.to_string(), name.clone());
    let env = parent.build_env();
    Image {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-{}-", name, P::kind(&()).to_lowercase())),
            labels: Some(child_labels),
            ..Default::default()
        },
        spec: ImageSpec {
            tag: target.to_string(),
            builder: ImageBuilder { kind: "ClusterBuilder".into(), name: P::BUILDER.into() },
            service_account: settings::BUILD_SERVICE_ACCOUNT.into(),
            source: SourceConfig {
                git: source.git.as_ref().map(|g| kpack::Git { url: g.url.clone(), revision: g.revision.clone() }),
                sub_path: source.sub_path.clone().unwrap_or_default(),
            },
            cache_size: parent.cache_size().cloned(),
            build: if env.is_empty() { None } else { Some(ImageBuild { env }) },
        },
        status: None,
    }
}

pub struct BuildSync<S, P> {
    ctx: Context<S>,
    _kind: PhantomData<fn() -> P>,
}

impl<S, P> BuildSync<S, P> {
    pub fn new(ctx: Context<S>) -> Self { Self { ctx, _kind: PhantomData } }
}

#[async_trait]
impl<S: ObjectStore, P: BuildParent> ParentSync for BuildSync<S, P> {
    type Parent = P;

    async fn sync(&self, parent: &mut P) -> Result<(), Error> {
        let image = parent.image().to_string();
        let target = resolve::target_image(&self.ctx, parent, &image).await?;
        parent.status_mut().target_image = Some(target.clone());
        parent.manage().mark_true(IMAGE_RESOLVED);

        let desired = parent.source().map(|source| desired_image(&*parent, &target, source));
        let current = parent.status().and_then(|s| s.kpack_image_ref.as_ref()).map(|r| r.name.clone());
        let selector = LabelSelector::eq(P::LABEL, parent.name_any());
        let outcome = reconcile_child(&*self.ctx.store, &*parent, &selector, desired, current.as_deref()).await?;

        match outcome {
            ChildOutcome::NotOwned { name } => {
                parent.status_mut().kpack_image_ref = None;
                parent.manage().mark_false(KPACK_IMAGE_READY, NOT_OWNED, not_owned_message::<Image, P>(&name));
            }
            ChildOutcome::Live(None) => {
                // TODO: resolve the tag to a digest once a registry client is wired in.
                let status = parent.status_mut();
                status.kpack_image_ref = None;
                status.build_cache_ref = None;
                status.latest_image = Some(target);
                parent.manage().mark_true(KPACK_IMAGE_READY);
            }
            ChildOutcome::Live(Some(image)) => {
                parent.status_mut().kpack_image_ref = Some(ref_to::<Image>(&image.name_any()));
                let ready = image.ready_condition().cloned();
                parent.manage().propagate(KPACK_IMAGE_READY, ready.as_ref());
                if ready.as_ref().is_some_and(|c| c.is_true()) {
                    let built = image.status.unwrap_or_default();
                    let status = parent.status_mut();
                    if !built.latest_image.is_empty() {
                        status.latest_image = Some(built.latest_image);
                    }
                    status.build_cache_ref = (!built.build_cache_name.is_empty())
                        .then(|| ref_to::<PersistentVolumeClaim>(&built.build_cache_name));
                }
                debug!(kind = %P::kind(&()), name = %parent.name_any(), ready = ?ready.map(|c| c.status), "build projected");
            }
        }
        Ok(())
    }
}

pub fn reconciler<S: ObjectStore, P: BuildParent>(ctx: &Context<S>) -> ParentReconciler<S, BuildSync<S, P>> {
    ParentReconciler::new(P::CONTROLLER, Arc::clone(&ctx.store), BuildSync::new(ctx.clone()))
}

fn controller_for<S: ObjectStore, P: BuildParent>(ctx: &Context<S>) -> Controller<S> {
    Controller::new(Arc::clone(&ctx.store), Arc::new(reconciler::<S, P>(ctx)), Arc::clone(&ctx.tracker))
        .for_kind::<P>()
        .owns::<Image>()
        .tracks::<ConfigMap>()
}

pub fn application_controller<S: ObjectStore>(ctx: &Context<S>) -> Controller<S> { controller_for::<S, Application>(ctx) }

pub fn function_controller<S: ObjectStore>(ctx: &Context<S>) -> Controller<S> { controller_for::<S, Function>(ctx) }
