//! JSON views used to decide whether a live child already matches what the
//! reconciler wants.

use serde_json::Value as Json;

/// Annotation holding the [`applied_view`] of what the reconciler last wrote.
pub const LAST_APPLIED: &str = "apply.projectriff.io/last-applied";

/// Drop server-populated fields: status, bookkeeping metadata and type meta.
pub fn strip_noisy(mut v: Json) -> Json {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
            obj.remove("resourceVersion");
            obj.remove("generation");
            obj.remove("creationTimestamp");
            obj.remove("uid");
            obj.remove("selfLink");
        }
    }
    if let Some(obj) = v.as_object_mut() {
        obj.remove("status");
        obj.remove("apiVersion");
        obj.remove("kind");
    }
    v
}

/// Whether `actual` contains everything `desired` sets. Objects may carry
/// extra keys (server defaults); arrays must match element for element.
pub fn covers(actual: &Json, desired: &Json) -> bool {
    match (actual, desired) {
        (_, Json::Null) => true,
        (Json::Object(a), Json::Object(d)) => d.iter().all(|(k, dv)| match a.get(k) {
            Some(av) => covers(av, dv),
            None => is_empty(dv),
        }),
        (Json::Array(a), Json::Array(d)) => a.len() == d.len() && a.iter().zip(d).all(|(av, dv)| covers(av, dv)),
        (Json::Null, d) => is_empty(d),
        (a, d) => a == d,
    }
}

fn is_empty(v: &Json) -> bool {
    match v {
        Json::Null => true,
        Json::Object(o) => o.is_empty(),
        Json::Array(a) => a.is_empty(),
        _ => false,
    }
}

fn map_at<'a>(v: &'a Json, field: &str) -> Option<&'a serde_json::Map<String, Json>> {
    v.get("metadata").and_then(|m| m.get(field)).and_then(Json::as_object).filter(|m| !m.is_empty())
}

/// Labels must match exactly; desired annotations must be present.
pub fn meta_matches(actual: &Json, desired: &Json) -> bool {
    map_at(actual, "labels") == map_at(desired, "labels")
        && match map_at(desired, "annotations") {
            None => true,
            Some(d) => map_at(actual, "annotations").map(|a| d.iter().all(|(k, v)| a.get(k) == Some(v))).unwrap_or(false),
        }
}

/// Everything outside `metadata`, after [`strip_noisy`].
pub fn body(v: &Json) -> Json {
    let mut v = strip_noisy(v.clone());
    if let Some(obj) = v.as_object_mut() {
        obj.remove("metadata");
    }
    v
}

/// The part of a desired child the reconciler manages: its body plus its
/// labels and annotations.
pub fn applied_view(v: &Json) -> Json {
    let mut out = body(v);
    let mut meta = serde_json::Map::new();
    for field in ["labels", "annotations"] {
        if let Some(m) = map_at(v, field) {
            let mut m = m.clone();
            m.remove(LAST_APPLIED);
            if !m.is_empty() {
                meta.insert(field.to_string(), Json::Object(m));
            }
        }
    }
    if let (Some(obj), false) = (out.as_object_mut(), meta.is_empty()) {
        obj.insert("metadata".into(), Json::Object(meta));
    }
    out
}

/// The view recorded on `actual` by an earlier apply, if any.
pub fn last_applied(actual: &Json) -> Option<Json> {
    map_at(actual, "annotations")?.get(LAST_APPLIED)?.as_str().and_then(|s| serde_json::from_str(s).ok())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub adds: usize,
    pub updates: usize,
    pub removes: usize,
}

/// Count leaf-level differences between `target` and `base`.
pub fn diff_summary(target: &Json, base: &Json) -> DiffSummary {
    fn walk(a: &Json, b: &Json, s: &mut DiffSummary) {
        match (a, b) {
            (Json::Object(ao), Json::Object(bo)) => {
                for (k, av) in ao.iter() {
                    match bo.get(k) {
                        Some(bv) if av == bv => {}
                        Some(bv) => walk(av, bv, s),
                        None => s.adds += 1,
                    }
                }
                s.removes += bo.keys().filter(|k| !ao.contains_key(*k)).count();
            }
            (Json::Array(aa), Json::Array(bb)) => {
                let min_len = aa.len().min(bb.len());
                for i in 0..min_len {
                    if aa[i] != bb[i] {
                        walk(&aa[i], &bb[i], s);
                    }
                }
                s.adds += aa.len().saturating_sub(bb.len());
                s.removes += bb.len().saturating_sub(aa.len());
            }
            (av, bv) => {
                if av != bv {
                    s.updates += 1;
                }
            }
        }
    }
    let mut s = DiffSummary::default();
    walk(target, base, &mut s);
    s
}
