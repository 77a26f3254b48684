//! Publishes the latest images of the platform's kpack ClusterBuilders into
//! the `<system-namespace>/builders` config map.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use riff_core::{settings, ObjectKey};
use riff_kubehub::{get_opt, LabelSelector, ObjectStore};
use riff_runtime::{Controller, Error, Reconciler};
use riff_schema::kpack::ClusterBuilder;
use tracing::{debug, info};

use crate::Context;

const WELL_KNOWN: [&str; 2] = [settings::APPLICATION_BUILDER, settings::FUNCTION_BUILDER];

pub struct ClusterBuilderReconciler<S> {
    ctx: Context<S>,
}

impl<S: ObjectStore> ClusterBuilderReconciler<S> {
    pub fn new(ctx: Context<S>) -> Self { Self { ctx } }

    fn target(&self) -> ObjectKey { builders_key(&self.ctx) }
}

fn builders_key<S>(ctx: &Context<S>) -> ObjectKey {
    ObjectKey::new(ctx.settings.system_namespace.clone(), settings::BUILDERS)
}

#[async_trait]
impl<S: ObjectStore> Reconciler for ClusterBuilderReconciler<S> {
    fn name(&self) -> &'static str { "clusterbuilder" }

    async fn reconcile(&self, key: &ObjectKey) -> Result<(), Error> {
        if *key != self.target() {
            return Ok(());
        }
        let existing = get_opt::<S, ConfigMap>(&*self.ctx.store, key).await?;
        if existing.as_ref().is_some_and(|m| m.metadata.deletion_timestamp.is_some()) {
            return Ok(());
        }

        let data: BTreeMap<String, String> = self
            .ctx
            .store
            .list::<ClusterBuilder>("", &LabelSelector::everything())
            .await?
            .into_iter()
            .filter(|b| WELL_KNOWN.contains(&b.name_any().as_str()))
            .map(|b| (b.name_any(), b.status.map(|s| s.latest_image).unwrap_or_default()))
            .collect();

        match existing {
            None => {
                let map = ConfigMap {
                    metadata: ObjectMeta {
                        namespace: Some(key.namespace.clone()),
                        name: Some(key.name.clone()),
                        ..Default::default()
                    },
                    data: (!data.is_empty()).then_some(data),
                    ..Default::default()
                };
                self.ctx.store.create(&map).await?;
                info!(key = %key, "created builders map");
            }
            Some(mut map) => {
                if map.data.clone().unwrap_or_default() == data {
                    debug!(key = %key, "builders map unchanged");
                    return Ok(());
                }
                map.data = (!data.is_empty()).then_some(data);
                self.ctx.store.update(&map).await?;
                info!(key = %key, "updated builders map");
            }
        }
        Ok(())
    }
}

pub fn controller<S: ObjectStore>(ctx: &Context<S>) -> Controller<S> {
    let target = builders_key(ctx);
    let on_map = target.clone();
    Controller::new(Arc::clone(&ctx.store), Arc::new(ClusterBuilderReconciler::new(ctx.clone())), Arc::clone(&ctx.tracker))
        .watches::<ConfigMap>(move |m| {
            let key = ObjectKey::new(m.namespace().unwrap_or_default(), m.name_any());
            if key == on_map { vec![key] } else { Vec::new() }
        })
        .watches::<ClusterBuilder>(move |_| vec![target.clone()])
}
