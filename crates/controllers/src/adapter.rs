//! Knative Adapter: keep an existing serving Service or Configuration running
//! the latest image of a build resource. The target is updated in place and
//! never owned.

use std::sync::Arc;

use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use riff_core::ObjectKey;
use riff_kubehub::{get_opt, Object, ObjectStore};
use riff_runtime::{Controller, Error, ParentReconciler, ParentSync};
use riff_schema::build::{Application, Container, Function};
use riff_schema::knative::{Adapter, BUILD_READY, TARGET_FOUND};
use riff_schema::serving::{self, Configuration, RevisionTemplateSpec};
use riff_schema::Parent;
use tracing::info;

use crate::resolve::{self, BuildRef};
use crate::Context;

pub(crate) const NOT_FOUND: &str = "NotFound";

/// A serving kind whose revision template an Adapter rewrites.
trait Target: Object {
    const NOUN: &'static str;
    fn template_mut(&mut self) -> &mut RevisionTemplateSpec;
}

impl Target for serving::Service {
    const NOUN: &'static str = "service";
    fn template_mut(&mut self) -> &mut RevisionTemplateSpec { &mut self.spec.template }
}

impl Target for Configuration {
    const NOUN: &'static str = "configuration";
    fn template_mut(&mut self) -> &mut RevisionTemplateSpec { &mut self.spec.template }
}

/// Point the user container at `image`. Returns whether anything changed.
fn retarget(template: &mut RevisionTemplateSpec, image: &str) -> bool {
    if template.user_container().is_none() {
        template.spec.pod.containers.push(Default::default());
    }
    match template.user_container_mut() {
        Some(c) if c.image.as_deref() != Some(image) => {
            c.image = Some(image.to_string());
            true
        }
        _ => false,
    }
}

pub struct AdapterSync<S> {
    ctx: Context<S>,
}

impl<S: ObjectStore> AdapterSync<S> {
    async fn adapt<T: Target>(&self, parent: &mut Adapter, name: &str, image: &str) -> Result<(), Error> {
        let key = ObjectKey::new(parent.namespace().unwrap_or_default(), name);
        self.ctx.track::<T, Adapter>(&key, parent);
        let Some(mut target) = get_opt::<S, T>(&*self.ctx.store, &key).await? else {
            parent.manage().mark_false(TARGET_FOUND, NOT_FOUND, format!("The {} {name:?} was not found.", T::NOUN));
            return Ok(());
        };
        parent.manage().mark_true(TARGET_FOUND);
        if retarget(target.template_mut(), image) {
            self.ctx.store.update(&target).await?;
            info!(adapter = %parent.name_any(), kind = %T::kind(&()), target = %key, image, "retargeted");
        }
        Ok(())
    }
}

#[async_trait]
impl<S: ObjectStore> ParentSync for AdapterSync<S> {
    type Parent = Adapter;

    async fn sync(&self, parent: &mut Adapter) -> Result<(), Error> {
        let spec = parent.spec.clone();
        let Some(build) = BuildRef::first(&spec.build.application_ref, &spec.build.function_ref, &spec.build.container_ref)
        else {
            return Err(Error::invalid("no build reference"));
        };
        let Some(image) = resolve::build_image(&self.ctx, &*parent, build).await? else {
            return Ok(());
        };
        parent.status_mut().latest_image = Some(image.clone());
        parent.manage().mark_true(BUILD_READY);

        let target = &spec.target;
        if !target.service_ref.is_empty() {
            self.adapt::<serving::Service>(parent, &target.service_ref, &image).await
        } else if !target.configuration_ref.is_empty() {
            self.adapt::<Configuration>(parent, &target.configuration_ref, &image).await
        } else {
            Err(Error::invalid("no target reference"))
        }
    }
}

pub fn reconciler<S: ObjectStore>(ctx: &Context<S>) -> ParentReconciler<S, AdapterSync<S>> {
    ParentReconciler::new("adapter", Arc::clone(&ctx.store), AdapterSync { ctx: ctx.clone() })
}

pub fn controller<S: ObjectStore>(ctx: &Context<S>) -> Controller<S> {
    Controller::new(Arc::clone(&ctx.store), Arc::new(reconciler(ctx)), Arc::clone(&ctx.tracker))
        .for_kind::<Adapter>()
        .tracks::<Application>()
        .tracks::<Function>()
        .tracks::<Container>()
        .tracks::<serving::Service>()
        .tracks::<Configuration>()
}
