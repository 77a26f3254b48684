#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use kube::Resource;
use riff_controllers::{Context, Settings};
use riff_core::{conditions, Condition, ConditionStatus, ObjectKey};
use riff_runtime::{set_controller, Tracker};
use riff_schema::build::BuildStatus;
use riff_schema::Parent;
use riff_store::MemoryStore;

pub const NS: &str = "test-namespace";
pub const SHA: &str = "cf8b4c69d5460f88530e1c80b8856a70801f31c50b191c8413043ba9b160a43e";

pub fn image(name: &str) -> String { format!("example.com/repo/{name}@sha256:{SHA}") }

pub fn context(store: &Arc<MemoryStore>) -> Context<MemoryStore> {
    Context::new(Arc::clone(store), Arc::new(Tracker::default()), Settings::default())
}

pub fn key(name: &str) -> ObjectKey { ObjectKey::new(NS, name) }

/// Give a fixture parent the identity a real server would.
pub fn stamp<P: Resource>(mut p: P) -> P {
    let name = p.meta().name.clone().unwrap_or_default();
    let meta = p.meta_mut();
    meta.namespace = Some(NS.into());
    meta.uid = Some(format!("{name}-uid"));
    meta.generation = Some(1);
    p
}

pub fn config_map(namespace: &str, name: &str, data: &[(&str, &str)]) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta { namespace: Some(namespace.into()), name: Some(name.into()), ..Default::default() },
        data: (!data.is_empty()).then(|| data.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
        ..Default::default()
    }
}

/// Mark `child` as controlled by `parent` and name it.
pub fn owned_by<C: Resource<DynamicType = ()>, P: Resource<DynamicType = ()>>(mut child: C, parent: &P, name: &str) -> C {
    let meta = child.meta_mut();
    meta.name = Some(name.into());
    meta.namespace = Some(NS.into());
    meta.generate_name = None;
    set_controller(child.meta_mut(), parent);
    child
}

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// A build status carrying a ready latest image.
pub fn built(image: &str) -> BuildStatus {
    BuildStatus { latest_image: Some(image.into()), ..Default::default() }
}

/// The last status written for `P`.
pub fn last_status<P: Parent>(store: &MemoryStore) -> P {
    match store.status_updated::<P>().pop() {
        Some(p) => p,
        None => panic!("no status update for {}", P::kind(&())),
    }
}

pub fn condition<P: Parent>(p: &P, type_: &str) -> Option<Condition> { conditions::find(p.conditions(), type_).cloned() }

pub fn status_of<P: Parent>(p: &P, type_: &str) -> Option<ConditionStatus> { condition(p, type_).map(|c| c.status) }

/// A true Ready condition for serving and kpack children.
pub fn ready_true() -> Condition { Condition::new(riff_core::READY, ConditionStatus::True) }
