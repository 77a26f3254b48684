//! Container: an externally built image, echoed into status so runtime
//! resources can reference it like any other build.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use riff_kubehub::ObjectStore;
use riff_runtime::{Controller, Error, ParentReconciler, ParentSync};
use riff_schema::build::{Container, IMAGE_RESOLVED};
use riff_schema::Parent;

use crate::{resolve, Context};

pub struct ContainerSync<S> {
    ctx: Context<S>,
}

#[async_trait]
impl<S: ObjectStore> ParentSync for ContainerSync<S> {
    type Parent = Container;

    async fn sync(&self, parent: &mut Container) -> Result<(), Error> {
        let image = parent.spec.image.clone();
        let target = resolve::target_image(&self.ctx, parent, &image).await?;
        let status = parent.status_mut();
        status.target_image = Some(target.clone());
        status.latest_image = Some(target);
        parent.manage().mark_true(IMAGE_RESOLVED);
        Ok(())
    }
}

pub fn reconciler<S: ObjectStore>(ctx: &Context<S>) -> ParentReconciler<S, ContainerSync<S>> {
    ParentReconciler::new("container", Arc::clone(&ctx.store), ContainerSync { ctx: ctx.clone() })
}

pub fn controller<S: ObjectStore>(ctx: &Context<S>) -> Controller<S> {
    Controller::new(Arc::clone(&ctx.store), Arc::new(reconciler(ctx)), Arc::clone(&ctx.tracker))
        .for_kind::<Container>()
        .tracks::<ConfigMap>()
}
