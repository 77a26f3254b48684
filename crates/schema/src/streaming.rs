//! streaming.projectriff.io/v1alpha1: Processor, a function wired to streams
//! through a sidecar and scaled by KEDA.

use k8s_openapi::api::core::v1::{PodTemplateSpec, TypedLocalObjectReference};
use kube::CustomResource;
use riff_core::{Condition, ConditionSet};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::parent;

pub const GROUP: &str = "streaming.projectriff.io";

pub const STREAMS_READY: &str = "StreamsReady";
pub const DEPLOYMENT_READY: &str = "DeploymentReady";
pub const SCALED_OBJECT_READY: &str = "ScaledObjectReady";

pub const PROCESSOR_CONDITIONS: ConditionSet =
    ConditionSet::living(&[STREAMS_READY, DEPLOYMENT_READY, SCALED_OBJECT_READY]);

pub const DEFAULT_START_OFFSET: &str = "latest";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container_ref: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub function_ref: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InputStreamBinding {
    pub stream: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub alias: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub start_offset: String,
}

impl InputStreamBinding {
    pub fn alias(&self) -> &str { if self.alias.is_empty() { &self.stream } else { &self.alias } }

    pub fn start_offset(&self) -> &str {
        if self.start_offset.is_empty() { DEFAULT_START_OFFSET } else { &self.start_offset }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OutputStreamBinding {
    pub stream: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub alias: String,
}

impl OutputStreamBinding {
    pub fn alias(&self) -> &str { if self.alias.is_empty() { &self.stream } else { &self.alias } }
}

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(group = "streaming.projectriff.io", version = "v1alpha1", kind = "Processor", namespaced)]
#[kube(status = "ProcessorStatus")]
#[serde(rename_all = "camelCase")]
pub struct ProcessorSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<Build>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<PodTemplateSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<InputStreamBinding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputStreamBinding>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_ref: Option<TypedLocalObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaled_object_ref: Option<TypedLocalObjectReference>,
}

parent!(Processor, ProcessorStatus, PROCESSOR_CONDITIONS);
