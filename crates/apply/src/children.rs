//! Semantic equality and merge for every child kind the reconcilers manage.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::networking::v1::Ingress;
use riff_kubehub::Object;
use riff_schema::keda::ScaledObject;
use riff_schema::kpack::Image;
use riff_schema::serving::{Configuration, Route};
use serde_json::Value as Json;

use crate::semantic::{applied_view, body, covers, last_applied, meta_matches, LAST_APPLIED};

/// A kind the child-set reconciler can converge.
pub trait Child: Object {
    /// Whether `actual` already carries everything in `desired` the
    /// reconciler manages: labels, annotations and the object body. A
    /// stamped `desired` also differs from any child applied from an older
    /// desired state, so fields dropped since then are noticed.
    fn semantic_eq(actual: &Self, desired: &Self) -> bool {
        match (serde_json::to_value(actual), serde_json::to_value(desired)) {
            (Ok(a), Ok(d)) => meta_matches(&a, &d) && covers(&body(&a), &body(&d)),
            _ => false,
        }
    }

    /// Record the managed view of `desired` in its [`LAST_APPLIED`] annotation.
    fn stamp_applied(desired: &mut Self) -> Result<(), serde_json::Error> {
        let view = serde_json::to_string(&applied_view(&serde_json::to_value(&*desired)?))?;
        desired.meta_mut().annotations.get_or_insert_with(Default::default).insert(LAST_APPLIED.to_string(), view);
        Ok(())
    }

    /// `actual` with the desired body, labels and annotations copied over.
    /// Fields the previous apply set and `desired` no longer does are
    /// removed. Identity and bookkeeping metadata stay as the server wrote
    /// them.
    fn merge(actual: &Self, desired: &Self) -> Result<Self, serde_json::Error> {
        let mut a = serde_json::to_value(actual)?;
        let d = serde_json::to_value(desired)?;
        let previous = last_applied(&a);
        if let (Some(ao), Json::Object(dobj)) = (a.as_object_mut(), d) {
            if let Some(Json::Object(prev)) = &previous {
                for k in prev.keys().filter(|k| k.as_str() != "metadata" && !dobj.contains_key(*k)) {
                    ao.remove(k);
                }
            }
            let empty = Json::Object(Default::default());
            merge_meta(ao, dobj.get("metadata").unwrap_or(&empty), previous.as_ref());
            for (k, v) in dobj {
                match k.as_str() {
                    "metadata" | "status" | "apiVersion" | "kind" => {}
                    _ => {
                        ao.insert(k, v);
                    }
                }
            }
        }
        let mut merged: Self = serde_json::from_value(a)?;
        Self::preserve(actual, &mut merged);
        Ok(merged)
    }

    /// Restore server-assigned body fields after a merge.
    fn preserve(_actual: &Self, _merged: &mut Self) {}
}

/// Labels are replaced. Annotations the previous apply managed are replaced by
/// the desired ones; annotations written by others are kept.
fn merge_meta(actual: &mut serde_json::Map<String, Json>, desired: &Json, previous: Option<&Json>) {
    let meta = actual.entry("metadata").or_insert_with(|| Json::Object(Default::default()));
    let Some(meta) = meta.as_object_mut() else { return };
    match desired.get("labels") {
        Some(l) => meta.insert("labels".into(), l.clone()),
        None => meta.remove("labels"),
    };
    let want = desired.get("annotations").and_then(Json::as_object);
    let managed: Vec<String> = previous
        .and_then(|p| p.get("metadata")?.get("annotations")?.as_object().map(|m| m.keys().cloned().collect()))
        .unwrap_or_default();
    let ann = meta.entry("annotations").or_insert_with(|| Json::Object(Default::default()));
    if let Some(ann) = ann.as_object_mut() {
        for k in managed.iter().filter(|k| !want.is_some_and(|w| w.contains_key(*k))) {
            ann.remove(k);
        }
        for (k, v) in want.into_iter().flatten() {
            ann.insert(k.clone(), v.clone());
        }
    }
    if meta.get("annotations").and_then(Json::as_object).is_some_and(|a| a.is_empty()) {
        meta.remove("annotations");
    }
}

impl Child for Deployment {}
impl Child for Ingress {}
impl Child for ConfigMap {}
impl Child for Image {}
impl Child for Configuration {}
impl Child for Route {}
impl Child for ScaledObject {}

impl Child for Service {
    fn preserve(actual: &Self, merged: &mut Self) {
        let (Some(a), Some(m)) = (actual.spec.as_ref(), merged.spec.as_mut()) else { return };
        if m.cluster_ip.is_none() {
            m.cluster_ip = a.cluster_ip.clone();
        }
        if m.cluster_ips.is_none() {
            m.cluster_ips = a.cluster_ips.clone();
        }
    }
}
