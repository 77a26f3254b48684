//! build.projectriff.io/v1alpha1: Application, Function, Container.

use k8s_openapi::api::core::v1::TypedLocalObjectReference;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use riff_core::{Condition, ConditionSet};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::parent;

pub const GROUP: &str = "build.projectriff.io";

pub const IMAGE_RESOLVED: &str = "ImageResolved";
pub const KPACK_IMAGE_READY: &str = "KpackImageReady";

pub const BUILD_CONDITIONS: ConditionSet = ConditionSet::living(&[IMAGE_RESOLVED, KPACK_IMAGE_READY]);
pub const CONTAINER_CONDITIONS: ConditionSet = ConditionSet::living(&[IMAGE_RESOLVED]);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<Git>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Git {
    pub url: String,
    pub revision: String,
}

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(group = "build.projectriff.io", version = "v1alpha1", kind = "Application", namespaced)]
#[kube(status = "BuildStatus", shortname = "app")]
#[kube(printcolumn = r#"{"name":"Latest Image","type":"string","jsonPath":".status.latestImage"}"#)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_size: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
}

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(group = "build.projectriff.io", version = "v1alpha1", kind = "Function", namespaced)]
#[kube(status = "BuildStatus", shortname = "fn")]
#[kube(printcolumn = r#"{"name":"Latest Image","type":"string","jsonPath":".status.latestImage"}"#)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_size: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub artifact: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub handler: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub invoker: String,
}

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(group = "build.projectriff.io", version = "v1alpha1", kind = "Container", namespaced)]
#[kube(status = "BuildStatus")]
#[kube(printcolumn = r#"{"name":"Latest Image","type":"string","jsonPath":".status.latestImage"}"#)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
}

/// Status shared by the build-plane kinds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BuildStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kpack_image_ref: Option<TypedLocalObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_cache_ref: Option<TypedLocalObjectReference>,
}

impl BuildStatus {
    /// The image a runtime-plane resource should run, once the build is ready.
    pub fn ready_image(&self) -> Option<&str> {
        self.latest_image.as_deref().filter(|s| !s.is_empty())
    }
}

parent!(Application, BuildStatus, BUILD_CONDITIONS);
parent!(Function, BuildStatus, BUILD_CONDITIONS);
parent!(Container, BuildStatus, CONTAINER_CONDITIONS);

/// Read access to the build-plane status regardless of kind.
pub trait Buildable {
    fn build_status(&self) -> Option<&BuildStatus>;

    fn latest_image(&self) -> Option<&str> { self.build_status().and_then(BuildStatus::ready_image) }
}

impl Buildable for Application {
    fn build_status(&self) -> Option<&BuildStatus> { self.status.as_ref() }
}

impl Buildable for Function {
    fn build_status(&self) -> Option<&BuildStatus> { self.status.as_ref() }
}

impl Buildable for Container {
    fn build_status(&self) -> Option<&BuildStatus> { self.status.as_ref() }
}
