use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use kube::{
    api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, PostParams},
    runtime::watcher::{self, Event},
    Client,
};
use metrics::counter;
use riff_core::ObjectKey;
use tracing::{debug, info};

use crate::{key_of, plural, LabelSelector, Object, ObjectStore, Result, StoreError, WatchEvent};

/// [`ObjectStore`] over a live API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self { Self { client } }

    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await?;
        info!("connected to kube API server");
        Ok(Self::new(client))
    }

    /// Untyped handle for `K`; an empty namespace addresses all namespaces.
    fn api<K: Object>(&self, namespace: &str) -> Api<DynamicObject> {
        let ar = ApiResource::erase::<K>(&());
        if namespace.is_empty() {
            Api::all_with(self.client.clone(), &ar)
        } else {
            Api::namespaced_with(self.client.clone(), namespace, &ar)
        }
    }
}

fn to_dynamic<K: Object>(obj: &K) -> Result<DynamicObject> { Ok(serde_json::from_value(serde_json::to_value(obj)?)?) }

fn from_dynamic<K: Object>(obj: DynamicObject) -> Result<K> { Ok(serde_json::from_value(serde_json::to_value(obj)?)?) }

fn record<K: Object>(verb: &'static str) {
    counter!("riff_store_requests_total", 1, "verb" => verb, "kind" => K::kind(&()).to_string());
}

/// Classify API errors the reconcilers branch on.
fn map_err<K: Object>(err: kube::Error, name: &str) -> StoreError {
    match &err {
        kube::Error::Api(resp) if resp.code == 404 => StoreError::not_found::<K>(name),
        kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
            StoreError::already_exists::<K>(name)
        }
        kube::Error::Api(resp) if resp.code == 409 => StoreError::conflict::<K>(name, resp.message.clone()),
        _ => StoreError::Kube(err),
    }
}

fn name_of<K: Object>(obj: &K) -> String {
    let meta = obj.meta();
    meta.name.clone().or_else(|| meta.generate_name.clone()).unwrap_or_default()
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: Object>(&self, key: &ObjectKey) -> Result<K> {
        record::<K>("get");
        let obj = self.api::<K>(&key.namespace).get(&key.name).await.map_err(|e| map_err::<K>(e, &key.name))?;
        from_dynamic(obj)
    }

    async fn list<K: Object>(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<K>> {
        record::<K>("list");
        let lp = ListParams::default().labels(&selector.to_query());
        let list = self.api::<K>(namespace).list(&lp).await.map_err(|e| map_err::<K>(e, ""))?;
        list.items.into_iter().map(from_dynamic).collect()
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K> {
        record::<K>("create");
        let key = key_of(obj);
        let created: K = self
            .api::<K>(&key.namespace)
            .create(&PostParams::default(), &to_dynamic(obj)?)
            .await
            .map_err(|e| map_err::<K>(e, &name_of(obj)))
            .and_then(from_dynamic)?;
        debug!(kind = %K::kind(&()), key = %key_of(&created), "created");
        Ok(created)
    }

    async fn update<K: Object>(&self, obj: &K) -> Result<K> {
        record::<K>("update");
        let key = key_of(obj);
        let replaced = self
            .api::<K>(&key.namespace)
            .replace(&key.name, &PostParams::default(), &to_dynamic(obj)?)
            .await
            .map_err(|e| map_err::<K>(e, &key.name))?;
        from_dynamic(replaced)
    }

    async fn update_status<K: Object>(&self, obj: &K) -> Result<K> {
        record::<K>("update_status");
        let key = key_of(obj);
        let body = serde_json::to_vec(obj)?;
        let replaced = self
            .api::<K>(&key.namespace)
            .replace_status(&key.name, &PostParams::default(), body)
            .await
            .map_err(|e| map_err::<K>(e, &key.name))?;
        from_dynamic(replaced)
    }

    async fn delete<K: Object>(&self, key: &ObjectKey) -> Result<()> {
        record::<K>("delete");
        self.api::<K>(&key.namespace)
            .delete(&key.name, &DeleteParams::default())
            .await
            .map_err(|e| map_err::<K>(e, &key.name))?;
        Ok(())
    }

    fn watch<K: Object>(&self, namespace: &str) -> BoxStream<'static, Result<WatchEvent<K>>> {
        let api = self.api::<K>(namespace);
        let kind = plural::<K>();
        info!(kind = %kind, ns = %namespace, "watcher started");
        watcher::watcher(api, watcher::Config::default())
            .flat_map(move |ev| {
                let out: Vec<Result<WatchEvent<K>>> = match ev {
                    Ok(Event::Applied(o)) => vec![from_dynamic(o).map(WatchEvent::Applied)],
                    Ok(Event::Deleted(o)) => vec![from_dynamic(o).map(WatchEvent::Deleted)],
                    Ok(Event::Restarted(list)) => {
                        debug!(kind = %kind, count = list.len(), "watch restart");
                        list.into_iter().map(|o| from_dynamic(o).map(WatchEvent::Applied)).collect()
                    }
                    Err(e) => vec![Err(StoreError::Watch(e.to_string()))],
                };
                futures::stream::iter(out)
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    #[test]
    fn typed_objects_survive_the_untyped_api() {
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some("riff-core-settings".into()),
                namespace: Some("riff-system".into()),
                ..Default::default()
            },
            data: Some([("ingress.domain".to_string(), "example.com".to_string())].into()),
            ..Default::default()
        };
        let dynamic = to_dynamic(&cm).unwrap();
        let types = dynamic.types.clone().unwrap();
        assert_eq!((types.api_version.as_str(), types.kind.as_str()), ("v1", "ConfigMap"));
        assert_eq!(dynamic.data["data"]["ingress.domain"], "example.com");

        let back: ConfigMap = from_dynamic(dynamic).unwrap();
        assert_eq!(back, cm);
    }
}
