//! Riff kubehub: the object store seam the reconcilers talk to, and its
//! kube-backed implementation.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use futures::stream::BoxStream;
use kube::Resource;
use riff_core::ObjectKey;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

mod kube_store;

pub use kube_store::KubeStore;

/// Anything the store can read and write: a statically typed kube resource.
pub trait Object: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<K> Object for K where K: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Lower-case plural used in API paths and error messages, e.g. `configmaps`.
pub fn plural<K: Object>() -> String { K::plural(&()).to_string() }

pub fn key_of<K: Object>(obj: &K) -> ObjectKey {
    let meta = obj.meta();
    ObjectKey::new(meta.namespace.clone().unwrap_or_default(), meta.name.clone().unwrap_or_default())
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{resource} {name:?} not found")]
    NotFound { resource: String, name: String },
    #[error("{resource} {name:?} already exists")]
    AlreadyExists { resource: String, name: String },
    #[error("operation cannot be fulfilled on {resource} {name:?}: {message}")]
    Conflict { resource: String, name: String, message: String },
    #[error("{0}")]
    Induced(String),
    #[error("invalid object: {0}")]
    Invalid(String),
    #[error("watch failed: {0}")]
    Watch(String),
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found<K: Object>(name: &str) -> Self { Self::NotFound { resource: plural::<K>(), name: name.to_string() } }

    pub fn already_exists<K: Object>(name: &str) -> Self {
        Self::AlreadyExists { resource: plural::<K>(), name: name.to_string() }
    }

    pub fn conflict<K: Object>(name: &str, message: impl Into<String>) -> Self {
        Self::Conflict { resource: plural::<K>(), name: name.to_string(), message: message.into() }
    }

    pub fn is_not_found(&self) -> bool { matches!(self, Self::NotFound { .. }) }
    pub fn is_already_exists(&self) -> bool { matches!(self, Self::AlreadyExists { .. }) }
    pub fn is_conflict(&self) -> bool { matches!(self, Self::Conflict { .. }) }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Equality-based label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector(pub BTreeMap<String, String>);

impl LabelSelector {
    pub fn eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut m = BTreeMap::new();
        m.insert(key.into(), value.into());
        Self(m)
    }

    pub fn everything() -> Self { Self::default() }

    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        self.0.iter().all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
    }

    /// `k1=v1,k2=v2`, as accepted by the list API.
    pub fn to_query(&self) -> String {
        self.0.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",")
    }
}

/// Change notification delivered by [`ObjectStore::watch`].
#[derive(Debug, Clone)]
pub enum WatchEvent<K> {
    Applied(K),
    Deleted(K),
}

impl<K> WatchEvent<K> {
    pub fn object(&self) -> &K {
        match self {
            Self::Applied(o) | Self::Deleted(o) => o,
        }
    }
}

/// Typed CRUD, list and watch over kube resources. An empty namespace means
/// cluster scope for `list` and `watch`.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn get<K: Object>(&self, key: &ObjectKey) -> Result<K>;
    async fn list<K: Object>(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<K>>;
    /// Create honouring `metadata.generateName`; returns the stored object.
    async fn create<K: Object>(&self, obj: &K) -> Result<K>;
    /// Replace; `metadata.resourceVersion` is passed through for optimistic concurrency.
    async fn update<K: Object>(&self, obj: &K) -> Result<K>;
    async fn update_status<K: Object>(&self, obj: &K) -> Result<K>;
    async fn delete<K: Object>(&self, key: &ObjectKey) -> Result<()>;
    fn watch<K: Object>(&self, namespace: &str) -> BoxStream<'static, Result<WatchEvent<K>>>;
}

/// `get` that maps `NotFound` to `None`.
pub async fn get_opt<S: ObjectStore + ?Sized, K: Object>(store: &S, key: &ObjectKey) -> Result<Option<K>> {
    match store.get::<K>(key).await {
        Ok(o) => Ok(Some(o)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
