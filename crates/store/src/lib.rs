//! Riff store: an in-RAM [`ObjectStore`] that behaves like a small API server.
//!
//! Objects are kept as JSON keyed by group/kind, namespace and name. Creates
//! honour `generateName` with a store-wide `NNN` counter, so generated names
//! are stable across runs. Every mutating request is recorded, and failures
//! can be induced per verb and kind.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use riff_core::ObjectKey;
use riff_kubehub::{key_of, LabelSelector, Object, ObjectStore, Result, StoreError, WatchEvent};
use rustc_hash::FxHashMap;
use serde_json::Value as Json;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    List,
    Create,
    Update,
    UpdateStatus,
    Delete,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verb::Get => "get",
            Verb::List => "list",
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::UpdateStatus => "update status",
            Verb::Delete => "delete",
        })
    }
}

/// A recorded mutating request.
#[derive(Debug, Clone)]
pub struct Action {
    pub verb: Verb,
    pub kind: String,
    pub key: ObjectKey,
    /// The object as submitted; `None` for deletes.
    pub object: Option<Json>,
}

type Reaction = Arc<dyn Fn() -> StoreError + Send + Sync>;

#[derive(Clone)]
struct Change {
    kind: String,
    namespace: String,
    deleted: bool,
    object: Json,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<(String, String, String), Json>,
    actions: Vec<Action>,
    reactions: FxHashMap<(Verb, String), Reaction>,
    sequence: u64,
    resource_version: u64,
}

pub struct MemoryStore {
    state: Mutex<State>,
    changes: broadcast::Sender<Change>,
}

impl Default for MemoryStore {
    fn default() -> Self { Self::new() }
}

fn kind_of<K: Object>() -> String { format!("{}/{}", K::group(&()), K::kind(&())) }

fn meta_str<'a>(v: &'a Json, field: &str) -> Option<&'a str> {
    v.get("metadata").and_then(|m| m.get(field)).and_then(Json::as_str)
}

fn set_meta(v: &mut Json, field: &str, value: Json) {
    if let Some(obj) = v.as_object_mut() {
        let meta = obj.entry("metadata").or_insert_with(|| Json::Object(Default::default()));
        if let Some(m) = meta.as_object_mut() {
            m.insert(field.to_string(), value);
        }
    }
}

/// Everything but metadata and status.
fn spec_part(v: &Json) -> Json {
    let mut v = v.clone();
    if let Some(obj) = v.as_object_mut() {
        obj.remove("metadata");
        obj.remove("status");
    }
    v
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(1024);
        Self { state: Mutex::new(State::default()), changes }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Insert an object as-is, without recording an action.
    pub fn seed<K: Object>(&self, obj: &K) {
        let key = key_of(obj);
        let Ok(v) = serde_json::to_value(obj) else { return };
        self.lock().objects.insert((kind_of::<K>(), key.namespace, key.name), v);
    }

    pub fn with<K: Object>(self, obj: &K) -> Self {
        self.seed(obj);
        self
    }

    /// Fail every `verb` request on kind `K` with an induced error.
    pub fn fail_on<K: Object>(&self, verb: Verb) {
        let msg = format!("inducing failure for {} {}", verb, K::kind(&()));
        self.fail_on_with::<K>(verb, move || StoreError::Induced(msg.clone()));
    }

    pub fn fail_on_with<K: Object>(&self, verb: Verb, reaction: impl Fn() -> StoreError + Send + Sync + 'static) {
        self.lock().reactions.insert((verb, kind_of::<K>()), Arc::new(reaction));
    }

    fn react<K: Object>(state: &State, verb: Verb) -> Result<()> {
        match state.reactions.get(&(verb, kind_of::<K>())) {
            Some(r) => Err(r()),
            None => Ok(()),
        }
    }

    fn record<K: Object>(state: &mut State, verb: Verb, key: ObjectKey, object: Option<Json>) {
        state.actions.push(Action { verb, kind: K::kind(&()).to_string(), key, object });
    }

    fn next_version(state: &mut State) -> String {
        state.resource_version += 1;
        state.resource_version.to_string()
    }

    fn publish(&self, kind: String, namespace: String, deleted: bool, object: Json) {
        let _ = self.changes.send(Change { kind, namespace, deleted, object });
    }

    pub fn actions(&self) -> Vec<Action> { self.lock().actions.clone() }

    pub fn clear_actions(&self) { self.lock().actions.clear(); }

    fn recorded<K: Object>(&self, verb: Verb) -> Vec<K> {
        let kind = K::kind(&()).to_string();
        self.lock()
            .actions
            .iter()
            .filter(|a| a.verb == verb && a.kind == kind)
            .filter_map(|a| a.object.clone())
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect()
    }

    /// Create requests for `K`, as submitted (failed ones included).
    pub fn created<K: Object>(&self) -> Vec<K> { self.recorded::<K>(Verb::Create) }
    pub fn updated<K: Object>(&self) -> Vec<K> { self.recorded::<K>(Verb::Update) }
    pub fn status_updated<K: Object>(&self) -> Vec<K> { self.recorded::<K>(Verb::UpdateStatus) }

    pub fn deleted<K: Object>(&self) -> Vec<ObjectKey> {
        let kind = K::kind(&()).to_string();
        self.lock()
            .actions
            .iter()
            .filter(|a| a.verb == Verb::Delete && a.kind == kind)
            .map(|a| a.key.clone())
            .collect()
    }

    /// Number of creates, updates and deletes across all kinds.
    pub fn mutations(&self) -> usize {
        self.lock()
            .actions
            .iter()
            .filter(|a| matches!(a.verb, Verb::Create | Verb::Update | Verb::Delete))
            .count()
    }

    /// Current stored copy, bypassing reactions.
    pub fn peek<K: Object>(&self, key: &ObjectKey) -> Option<K> {
        let st = self.lock();
        let v = st.objects.get(&(kind_of::<K>(), key.namespace.clone(), key.name.clone()))?;
        serde_json::from_value(v.clone()).ok()
    }

    pub fn all<K: Object>(&self) -> Vec<K> {
        let kind = kind_of::<K>();
        self.lock()
            .objects
            .iter()
            .filter(|((k, _, _), _)| *k == kind)
            .filter_map(|(_, v)| serde_json::from_value(v.clone()).ok())
            .collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: Object>(&self, key: &ObjectKey) -> Result<K> {
        let st = self.lock();
        Self::react::<K>(&st, Verb::Get)?;
        match st.objects.get(&(kind_of::<K>(), key.namespace.clone(), key.name.clone())) {
            Some(v) => Ok(serde_json::from_value(v.clone())?),
            None => Err(StoreError::not_found::<K>(&key.name)),
        }
    }

    async fn list<K: Object>(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<K>> {
        let st = self.lock();
        Self::react::<K>(&st, Verb::List)?;
        let kind = kind_of::<K>();
        let mut out = Vec::new();
        for ((k, ns, _), v) in st.objects.iter() {
            if *k != kind || (!namespace.is_empty() && ns != namespace) {
                continue;
            }
            let obj: K = serde_json::from_value(v.clone())?;
            if selector.matches(obj.meta().labels.as_ref()) {
                out.push(obj);
            }
        }
        Ok(out)
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K> {
        let mut v = serde_json::to_value(obj)?;
        let kind = kind_of::<K>();
        let namespace = meta_str(&v, "namespace").unwrap_or_default().to_string();
        let stored = {
            let mut st = self.lock();
            Self::record::<K>(&mut st, Verb::Create, key_of(obj), Some(v.clone()));
            Self::react::<K>(&st, Verb::Create)?;
            let name = match (meta_str(&v, "name"), meta_str(&v, "generateName")) {
                (Some(n), _) if !n.is_empty() => n.to_string(),
                (_, Some(prefix)) if !prefix.is_empty() => {
                    st.sequence += 1;
                    format!("{}{:03}", prefix, st.sequence)
                }
                _ => return Err(StoreError::Invalid("name or generateName is required".into())),
            };
            let slot = (kind.clone(), namespace.clone(), name.clone());
            if st.objects.contains_key(&slot) {
                return Err(StoreError::already_exists::<K>(&name));
            }
            set_meta(&mut v, "name", Json::String(name));
            set_meta(&mut v, "uid", Json::String(uuid::Uuid::new_v4().to_string()));
            set_meta(&mut v, "generation", Json::from(1));
            let rv = Self::next_version(&mut st);
            set_meta(&mut v, "resourceVersion", Json::String(rv));
            st.objects.insert(slot, v.clone());
            v
        };
        debug!(kind = %kind, name = ?meta_str(&stored, "name"), "created");
        self.publish(kind, namespace, false, stored.clone());
        Ok(serde_json::from_value(stored)?)
    }

    async fn update<K: Object>(&self, obj: &K) -> Result<K> {
        let mut v = serde_json::to_value(obj)?;
        let key = key_of(obj);
        let kind = kind_of::<K>();
        let stored = {
            let mut st = self.lock();
            Self::record::<K>(&mut st, Verb::Update, key.clone(), Some(v.clone()));
            Self::react::<K>(&st, Verb::Update)?;
            let slot = (kind.clone(), key.namespace.clone(), key.name.clone());
            let current = st.objects.get(&slot).cloned().ok_or_else(|| StoreError::not_found::<K>(&key.name))?;
            check_version::<K>(&current, &v, &key.name)?;
            if let Some(status) = current.get("status") {
                if let Some(o) = v.as_object_mut() {
                    o.insert("status".into(), status.clone());
                }
            }
            let generation = current.get("metadata").and_then(|m| m.get("generation")).and_then(Json::as_i64).unwrap_or(0);
            let generation = if spec_part(&current) != spec_part(&v) { generation + 1 } else { generation };
            set_meta(&mut v, "generation", Json::from(generation));
            if let Some(uid) = meta_str(&current, "uid") {
                set_meta(&mut v, "uid", Json::String(uid.to_string()));
            }
            let rv = Self::next_version(&mut st);
            set_meta(&mut v, "resourceVersion", Json::String(rv));
            st.objects.insert(slot, v.clone());
            v
        };
        self.publish(kind, key.namespace, false, stored.clone());
        Ok(serde_json::from_value(stored)?)
    }

    async fn update_status<K: Object>(&self, obj: &K) -> Result<K> {
        let v = serde_json::to_value(obj)?;
        let key = key_of(obj);
        let kind = kind_of::<K>();
        let stored = {
            let mut st = self.lock();
            Self::record::<K>(&mut st, Verb::UpdateStatus, key.clone(), Some(v.clone()));
            Self::react::<K>(&st, Verb::UpdateStatus)?;
            let slot = (kind.clone(), key.namespace.clone(), key.name.clone());
            let mut current = st.objects.get(&slot).cloned().ok_or_else(|| StoreError::not_found::<K>(&key.name))?;
            check_version::<K>(&current, &v, &key.name)?;
            if let Some(o) = current.as_object_mut() {
                match v.get("status") {
                    Some(status) => o.insert("status".into(), status.clone()),
                    None => o.remove("status"),
                };
            }
            let rv = Self::next_version(&mut st);
            set_meta(&mut current, "resourceVersion", Json::String(rv));
            st.objects.insert(slot, current.clone());
            current
        };
        self.publish(kind, key.namespace, false, stored.clone());
        Ok(serde_json::from_value(stored)?)
    }

    async fn delete<K: Object>(&self, key: &ObjectKey) -> Result<()> {
        let kind = kind_of::<K>();
        let removed = {
            let mut st = self.lock();
            Self::record::<K>(&mut st, Verb::Delete, key.clone(), None);
            Self::react::<K>(&st, Verb::Delete)?;
            st.objects
                .remove(&(kind.clone(), key.namespace.clone(), key.name.clone()))
                .ok_or_else(|| StoreError::not_found::<K>(&key.name))?
        };
        self.publish(kind, key.namespace.clone(), true, removed);
        Ok(())
    }

    fn watch<K: Object>(&self, namespace: &str) -> BoxStream<'static, Result<WatchEvent<K>>> {
        let rx = self.changes.subscribe();
        let kind = kind_of::<K>();
        let namespace = namespace.to_string();
        stream::unfold(rx, move |mut rx| {
            let kind = kind.clone();
            let namespace = namespace.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(c) if c.kind == kind && (namespace.is_empty() || c.namespace == namespace) => {
                            let ev = serde_json::from_value::<K>(c.object).map_err(StoreError::from).map(|o| {
                                if c.deleted { WatchEvent::Deleted(o) } else { WatchEvent::Applied(o) }
                            });
                            return Some((ev, rx));
                        }
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(skipped = n, "watch lagged");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        })
        .boxed()
    }
}

fn check_version<K: Object>(current: &Json, submitted: &Json, name: &str) -> Result<()> {
    match (meta_str(current, "resourceVersion"), meta_str(submitted, "resourceVersion")) {
        (Some(have), Some(want)) if have != want => Err(StoreError::conflict::<K>(
            name,
            "the object has been modified; please apply your changes to the latest version and try again",
        )),
        _ => Ok(()),
    }
}
