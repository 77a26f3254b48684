//! Riff schema: typed resources for the platform kinds (build, core, knative,
//! streaming) and for the third-party kinds the reconcilers materialise
//! (kpack images and builders, knative serving, KEDA scaled objects).

#![forbid(unsafe_code)]

use std::fmt::Debug;

use k8s_openapi::api::core::v1::TypedLocalObjectReference;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{CustomResourceExt, Resource};
use riff_core::{Condition, ConditionManager, ConditionSet};
use serde::{de::DeserializeOwned, Serialize};

/// A platform resource whose status the reconciler runtime owns: conditions,
/// observed generation and kind-specific fields.
pub trait Parent: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Status: Clone + Default + PartialEq + Debug + Send + Sync;

    fn condition_set() -> ConditionSet;
    fn status(&self) -> Option<&Self::Status>;
    fn status_mut(&mut self) -> &mut Self::Status;
    fn conditions(&self) -> &[Condition];
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;
    fn observed_generation(&self) -> Option<i64>;
    fn set_observed_generation(&mut self, generation: Option<i64>);

    fn manage(&mut self) -> ConditionManager<'_> {
        Self::condition_set().manage(self.conditions_mut())
    }
}

/// Implements [`Parent`] for a kind whose status carries `conditions` and
/// `observed_generation`.
macro_rules! parent {
    ($kind:ty, $status:ty, $set:expr) => {
        impl $crate::Parent for $kind {
            type Status = $status;

            fn condition_set() -> riff_core::ConditionSet { $set }
            fn status(&self) -> Option<&$status> { self.status.as_ref() }
            fn status_mut(&mut self) -> &mut $status { self.status.get_or_insert_with(Default::default) }
            fn conditions(&self) -> &[riff_core::Condition] {
                self.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or(&[])
            }
            fn conditions_mut(&mut self) -> &mut Vec<riff_core::Condition> { &mut self.status_mut().conditions }
            fn observed_generation(&self) -> Option<i64> { self.status.as_ref().and_then(|s| s.observed_generation) }
            fn set_observed_generation(&mut self, generation: Option<i64>) {
                self.status_mut().observed_generation = generation;
            }
        }
    };
}
pub(crate) use parent;

pub mod build;
pub mod core_deployer;
pub mod keda;
pub mod knative;
pub mod kpack;
pub mod serving;
pub mod streaming;
pub mod validate;

/// Status reference to a managed child.
pub fn typed_ref(api_group: &str, kind: &str, name: &str) -> TypedLocalObjectReference {
    TypedLocalObjectReference {
        api_group: if api_group.is_empty() { None } else { Some(api_group.to_string()) },
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

/// Status reference to a child of kind `K`.
pub fn ref_to<K: Resource<DynamicType = ()>>(name: &str) -> TypedLocalObjectReference {
    typed_ref(&K::group(&()), &K::kind(&()), name)
}

/// Definitions of the platform's own kinds.
pub fn crds() -> Vec<CustomResourceDefinition> {
    vec![
        build::Application::crd(),
        build::Function::crd(),
        build::Container::crd(),
        core_deployer::Deployer::crd(),
        knative::Deployer::crd(),
        knative::Adapter::crd(),
        streaming::Processor::crd(),
    ]
}
