//! build.pivotal.io/v1alpha1 (kpack): Image builds and cluster builders.

use k8s_openapi::api::core::v1::EnvVar;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use riff_core::{conditions, Condition};
use serde::{Deserialize, Serialize};

pub const GROUP: &str = "build.pivotal.io";

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(group = "build.pivotal.io", version = "v1alpha1", kind = "Image", namespaced)]
#[kube(status = "ImageStatus", schema = "disabled")]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    pub tag: String,
    pub builder: ImageBuilder,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_account: String,
    pub source: SourceConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_size: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<ImageBuild>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageBuilder {
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<Git>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sub_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Git {
    pub url: String,
    pub revision: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageBuild {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub latest_image: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub build_cache_name: String,
}

impl Image {
    /// The Ready condition, trusted only once the status reflects the current spec.
    pub fn ready_condition(&self) -> Option<&Condition> {
        let status = self.status.as_ref()?;
        if status.observed_generation != self.metadata.generation {
            return None;
        }
        conditions::find(&status.conditions, riff_core::READY)
    }
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(group = "build.pivotal.io", version = "v1alpha1", kind = "ClusterBuilder")]
#[kube(status = "ClusterBuilderStatus", schema = "disabled")]
pub struct ClusterBuilderSpec {
    pub image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterBuilderStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub latest_image: String,
}
