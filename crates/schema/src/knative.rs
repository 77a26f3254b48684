//! knative.projectriff.io/v1alpha1: Deployer (Configuration + Route) and
//! Adapter (retargets an existing serving workload).

use k8s_openapi::api::core::v1::{PodTemplateSpec, TypedLocalObjectReference};
use kube::CustomResource;
use riff_core::{Condition, ConditionSet};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use crate::core_deployer::{Addressable, Build, IngressPolicy};
use crate::parent;

pub const GROUP: &str = "knative.projectriff.io";

pub const CONFIGURATION_READY: &str = "ConfigurationReady";
pub const ROUTE_READY: &str = "RouteReady";
pub const BUILD_READY: &str = "BuildReady";
pub const TARGET_FOUND: &str = "TargetFound";

pub const DEPLOYER_CONDITIONS: ConditionSet = ConditionSet::living(&[CONFIGURATION_READY, ROUTE_READY]);
pub const ADAPTER_CONDITIONS: ConditionSet = ConditionSet::living(&[BUILD_READY, TARGET_FOUND]);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Scale {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i32>,
}

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(group = "knative.projectriff.io", version = "v1alpha1", kind = "Deployer", namespaced)]
#[kube(status = "DeployerStatus")]
#[kube(printcolumn = r#"{"name":"URL","type":"string","jsonPath":".status.url"}"#)]
#[serde(rename_all = "camelCase")]
pub struct DeployerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<Build>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<PodTemplateSpec>,
    #[serde(default)]
    pub ingress_policy: IngressPolicy,
    #[serde(default)]
    pub scale: Scale,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeployerStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_ref: Option<TypedLocalObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_ref: Option<TypedLocalObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Addressable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// The serving workload an Adapter keeps pointed at the latest build. At most
/// one field is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdapterTarget {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_ref: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub configuration_ref: String,
}

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(group = "knative.projectriff.io", version = "v1alpha1", kind = "Adapter", namespaced)]
#[kube(status = "AdapterStatus")]
#[serde(rename_all = "camelCase")]
pub struct AdapterSpec {
    pub build: Build,
    pub target: AdapterTarget,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdapterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_image: Option<String>,
}

parent!(Deployer, DeployerStatus, DEPLOYER_CONDITIONS);
parent!(Adapter, AdapterStatus, ADAPTER_CONDITIONS);
