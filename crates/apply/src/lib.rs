//! Riff apply: converge "one desired child or none" against the children a
//! parent actually controls.

#![forbid(unsafe_code)]

use kube::Resource;
use metrics::counter;
use riff_kubehub::{key_of, LabelSelector, ObjectStore, StoreError};
use riff_runtime::{is_controlled_by, set_controller};
use tracing::{debug, info, warn};

mod children;
pub mod semantic;

pub use children::Child;
pub use semantic::LAST_APPLIED;

/// Result of converging one child kind for a parent.
#[derive(Debug, Clone, PartialEq)]
pub enum ChildOutcome<C> {
    /// The surviving owned child, if any.
    Live(Option<C>),
    /// A child we need exists under the desired name but is not ours.
    NotOwned { name: String },
}

impl<C> ChildOutcome<C> {
    pub fn live(&self) -> Option<&C> {
        match self {
            Self::Live(c) => c.as_ref(),
            Self::NotOwned { .. } => None,
        }
    }
}

pub const NOT_OWNED: &str = "NotOwned";

/// Condition message for a [`ChildOutcome::NotOwned`] collision.
pub fn not_owned_message<C: Child, P: Resource<DynamicType = ()>>(name: &str) -> String {
    format!("There is an existing {} {:?} that the {} does not own.", C::kind(&()), name, P::kind(&()))
}

fn name_of<C: Child>(c: &C) -> String { c.meta().name.clone().unwrap_or_default() }

fn count<C: Child>(verb: &'static str) {
    counter!("riff_child_mutations_total", 1, "kind" => C::kind(&()).to_string(), "verb" => verb);
}

/// Converge the children of kind `C` selected by `selector` in the parent's
/// namespace towards `desired`.
///
/// `desired` is stamped with the parent's namespace, controller reference and
/// last-applied annotation.
/// When several owned children exist, the one named by `current` (the name in
/// the parent's status ref) survives; without a match all are deleted and
/// a fresh child is created. Deletes run in name order and stop at the first
/// failure.
pub async fn reconcile_child<S, P, C>(
    store: &S,
    parent: &P,
    selector: &LabelSelector,
    desired: Option<C>,
    current: Option<&str>,
) -> Result<ChildOutcome<C>, StoreError>
where
    S: ObjectStore + ?Sized,
    P: Resource<DynamicType = ()>,
    C: Child,
{
    let namespace = parent.meta().namespace.clone().unwrap_or_default();
    let desired = match desired {
        Some(mut d) => {
            d.meta_mut().namespace = Some(namespace.clone());
            set_controller(d.meta_mut(), parent);
            C::stamp_applied(&mut d)?;
            Some(d)
        }
        None => None,
    };

    let listed = store.list::<C>(&namespace, selector).await?;
    let (mut owned, foreign): (Vec<C>, Vec<C>) = listed.into_iter().partition(|c| is_controlled_by(c.meta(), parent));
    owned.sort_by_key(name_of);

    if let Some(fixed) = desired.as_ref().and_then(|d| d.meta().name.clone()) {
        if foreign.iter().any(|c| c.meta().name.as_deref() == Some(fixed.as_str())) {
            warn!(kind = %C::kind(&()), name = %fixed, "desired child exists but is not owned");
            return Ok(ChildOutcome::NotOwned { name: fixed });
        }
    }

    if owned.len() > 1 {
        let keep = current.and_then(|name| owned.iter().position(|c| name_of(c) == name));
        let survivor = keep.map(|i| owned.remove(i));
        for extra in &owned {
            info!(kind = %C::kind(&()), name = %name_of(extra), "deleting extra child");
            count::<C>("delete");
            store.delete::<C>(&key_of(extra)).await?;
        }
        owned = survivor.into_iter().collect();
    }

    match (owned.pop(), desired) {
        (None, None) => Ok(ChildOutcome::Live(None)),
        (Some(actual), None) => {
            info!(kind = %C::kind(&()), name = %name_of(&actual), "deleting child no longer desired");
            count::<C>("delete");
            store.delete::<C>(&key_of(&actual)).await?;
            Ok(ChildOutcome::Live(None))
        }
        (Some(actual), Some(desired)) => {
            if C::semantic_eq(&actual, &desired) {
                return Ok(ChildOutcome::Live(Some(actual)));
            }
            let merged = C::merge(&actual, &desired)?;
            if let (Ok(a), Ok(m)) = (serde_json::to_value(&actual), serde_json::to_value(&merged)) {
                let d = semantic::diff_summary(&semantic::strip_noisy(m), &semantic::strip_noisy(a));
                debug!(kind = %C::kind(&()), name = %name_of(&actual), adds = d.adds, updates = d.updates, removes = d.removes, "child drifted");
            }
            info!(kind = %C::kind(&()), name = %name_of(&actual), "updating child");
            count::<C>("update");
            Ok(ChildOutcome::Live(Some(store.update(&merged).await?)))
        }
        (None, Some(desired)) => {
            count::<C>("create");
            match store.create(&desired).await {
                Ok(created) => {
                    info!(kind = %C::kind(&()), name = %name_of(&created), "created child");
                    Ok(ChildOutcome::Live(Some(created)))
                }
                Err(e) if e.is_already_exists() => {
                    let name = desired.meta().name.clone().unwrap_or_default();
                    warn!(kind = %C::kind(&()), name = %name, "create collided with a child we do not own");
                    Ok(ChildOutcome::NotOwned { name })
                }
                Err(e) => Err(e),
            }
        }
    }
}
