//! Riff core types: object keys, tracker references, well-known labels and the
//! condition aggregator shared by every reconciler.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod conditions;

pub use conditions::{Condition, ConditionManager, ConditionSet, ConditionSeverity, ConditionStatus, READY};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid object key {0:?} (expect name or namespace/name)")]
    Invalid(String),
}

/// `namespace/name` identity of an object within a kind. An empty namespace
/// denotes a cluster-scoped object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }

    pub fn cluster(name: impl Into<String>) -> Self { Self::new("", name) }

    pub fn is_cluster_scoped(&self) -> bool { self.namespace.is_empty() }

    pub fn parse(s: &str) -> Result<Self, KeyError> {
        let parts: Vec<_> = s.split('/').collect();
        match parts.as_slice() {
            [name] if !name.is_empty() => Ok(Self::cluster(*name)),
            [ns, name] if !ns.is_empty() && !name.is_empty() => Ok(Self::new(*ns, *name)),
            _ => Err(KeyError::Invalid(s.to_string())),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Kind-qualified object reference used by the tracker. The API version is not
/// part of the identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reference {
    pub group: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl Reference {
    pub fn new(group: impl Into<String>, kind: impl Into<String>, key: &ObjectKey) -> Self {
        Self { group: group.into(), kind: kind.into(), namespace: key.namespace.clone(), name: key.name.clone() }
    }

    pub fn key(&self) -> ObjectKey { ObjectKey::new(self.namespace.clone(), self.name.clone()) }

    /// `Kind.group`, or just `Kind` for the core group.
    pub fn group_kind(&self) -> String {
        if self.group.is_empty() { self.kind.clone() } else { format!("{}.{}", self.kind, self.group) }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.group_kind(), self.key())
    }
}

/// Labels stamped on every managed child, keyed `<kind>.<group>` and valued
/// with the parent's name.
pub mod labels {
    pub const APPLICATION: &str = "application.build.projectriff.io";
    pub const FUNCTION: &str = "function.build.projectriff.io";
    pub const CONTAINER: &str = "container.build.projectriff.io";
    pub const CORE_DEPLOYER: &str = "deployer.core.projectriff.io";
    pub const KNATIVE_DEPLOYER: &str = "deployer.knative.projectriff.io";
    pub const KNATIVE_ADAPTER: &str = "adapter.knative.projectriff.io";
    pub const PROCESSOR: &str = "processor.streaming.projectriff.io";

    pub const KNATIVE_VISIBILITY: &str = "serving.knative.dev/visibility";
    pub const KNATIVE_CLUSTER_LOCAL: &str = "cluster-local";
    pub const MIN_SCALE_ANNOTATION: &str = "autoscaling.knative.dev/minScale";
    pub const MAX_SCALE_ANNOTATION: &str = "autoscaling.knative.dev/maxScale";
    pub const DEPLOYMENT_NAME: &str = "deploymentName";
}

/// Well-known settings maps and their keys.
pub mod settings {
    pub const SYSTEM_NAMESPACE: &str = "riff-system";

    pub const BUILD: &str = "riff-build";
    pub const DEFAULT_IMAGE_PREFIX_KEY: &str = "default-image-prefix";

    pub const BUILDERS: &str = "builders";
    pub const APPLICATION_BUILDER: &str = "riff-application";
    pub const FUNCTION_BUILDER: &str = "riff-function";
    pub const BUILD_SERVICE_ACCOUNT: &str = "riff-build";

    pub const CORE_SETTINGS: &str = "riff-core-settings";
    pub const DEFAULT_DOMAIN_KEY: &str = "defaultDomain";
    pub const DEFAULT_DOMAIN: &str = "example.com";

    pub const PROCESSOR: &str = "riff-streaming-processor";
    pub const PROCESSOR_IMAGE_KEY: &str = "processorImage";
}
