//! core.projectriff.io/v1alpha1: Deployer backed by a Deployment, a Service and
//! an optional Ingress.

use k8s_openapi::api::core::v1::{PodTemplateSpec, TypedLocalObjectReference};
use kube::CustomResource;
use riff_core::{Condition, ConditionSet};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::parent;

pub const GROUP: &str = "core.projectriff.io";

pub const DEPLOYMENT_READY: &str = "DeploymentReady";
pub const SERVICE_READY: &str = "ServiceReady";
/// Informational; never part of `Ready`.
pub const INGRESS_READY: &str = "IngressReady";

pub const DEPLOYER_CONDITIONS: ConditionSet = ConditionSet::living(&[DEPLOYMENT_READY, SERVICE_READY]);

/// Reference to a build-plane resource in the same namespace. At most one
/// field is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub application_ref: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container_ref: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub function_ref: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum IngressPolicy {
    #[default]
    ClusterLocal,
    External,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Addressable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Addressable {
    pub fn url(url: impl Into<String>) -> Self { Self { url: Some(url.into()) } }
}

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(group = "core.projectriff.io", version = "v1alpha1", kind = "Deployer", namespaced)]
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
    pub deployment_ref: Option<TypedLocalObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_ref: Option<TypedLocalObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_ref: Option<TypedLocalObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Addressable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

parent!(Deployer, DeployerStatus, DEPLOYER_CONDITIONS);
