//! Lookups shared by several reconcilers: settings maps, default image
//! prefixes and build references. Every lookup tracks what it reads.

use k8s_openapi::api::core::v1::{ConfigMap, PodTemplateSpec};
use kube::ResourceExt;
use riff_core::{settings, ObjectKey};
use riff_kubehub::{get_opt, Object, ObjectStore};
use riff_runtime::Error;
use riff_schema::build::{Application, Buildable, Container, Function, IMAGE_RESOLVED};
use riff_schema::Parent;

use crate::Context;

pub(crate) const DEFAULT_IMAGE_PREFIX_MISSING: &str = "DefaultImagePrefixMissing";
pub(crate) const IMAGE_INVALID: &str = "ImageInvalid";

/// Fetch a settings map and track it for `dependent`. A missing map is an error.
pub(crate) async fn settings_map<S: ObjectStore, D: Object>(
    ctx: &Context<S>,
    key: &ObjectKey,
    dependent: &D,
) -> Result<ConfigMap, Error> {
    ctx.track::<ConfigMap, D>(key, dependent);
    Ok(ctx.store.get::<ConfigMap>(key).await?)
}

pub(crate) fn data<'a>(map: &'a ConfigMap, key: &str) -> Option<&'a str> {
    map.data.as_ref()?.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

/// Loose shape check for an image reference: `repo[:tag][@digest]` with no
/// whitespace and no empty path segments.
pub(crate) fn plausible_image(image: &str) -> bool {
    let name = image.split('@').next().unwrap_or_default();
    !image.is_empty()
        && !image.chars().any(char::is_whitespace)
        && !name.is_empty()
        && name.split('/').all(|segment| !segment.is_empty())
        && !name.ends_with(':')
}

/// The image a build-plane resource should produce: `image` when set,
/// otherwise `<default-image-prefix>/<name>` from the namespace's
/// `riff-build` map. Failures are recorded on `ImageResolved`.
pub(crate) async fn target_image<S: ObjectStore, P: Parent>(
    ctx: &Context<S>,
    parent: &mut P,
    image: &str,
) -> Result<String, Error> {
    if !image.is_empty() {
        if plausible_image(image) {
            return Ok(image.to_string());
        }
        let msg = format!("invalid image reference {image:?}");
        parent.manage().mark_false(IMAGE_RESOLVED, IMAGE_INVALID, msg.clone());
        return Err(Error::invalid(msg));
    }

    let key = ObjectKey::new(parent.namespace().unwrap_or_default(), settings::BUILD);
    ctx.track::<ConfigMap, P>(&key, parent);
    let map = match get_opt::<S, ConfigMap>(&*ctx.store, &key).await {
        Ok(map) => map,
        Err(e) => {
            parent.manage().mark_false(IMAGE_RESOLVED, IMAGE_INVALID, e.to_string());
            return Err(e.into());
        }
    };
    match map.as_ref().and_then(|m| data(m, settings::DEFAULT_IMAGE_PREFIX_KEY)) {
        Some(prefix) => Ok(format!("{}/{}", prefix.trim_end_matches('/'), parent.name_any())),
        None => {
            let msg = "missing default image prefix";
            parent.manage().mark_false(IMAGE_RESOLVED, DEFAULT_IMAGE_PREFIX_MISSING, msg);
            Err(Error::invalid(msg))
        }
    }
}

/// A reference to the build-plane resource whose latest image a runtime
/// resource runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BuildRef<'a> {
    Application(&'a str),
    Function(&'a str),
    Container(&'a str),
}

impl<'a> BuildRef<'a> {
    /// The first non-empty reference.
    pub(crate) fn first(application: &'a str, function: &'a str, container: &'a str) -> Option<Self> {
        [Self::Application(application), Self::Function(function), Self::Container(container)]
            .into_iter()
            .find(|r| !r.name().is_empty())
    }

    pub(crate) fn name(&self) -> &'a str {
        match *self {
            Self::Application(n) | Self::Function(n) | Self::Container(n) => n,
        }
    }
}

/// Latest image of the referenced build resource. `Ok(None)` when it does not
/// exist yet; an error when it exists without a ready image.
pub(crate) async fn build_image<S: ObjectStore, D: Object>(
    ctx: &Context<S>,
    dependent: &D,
    build: BuildRef<'_>,
) -> Result<Option<String>, Error> {
    match build {
        BuildRef::Application(name) => latest::<S, Application, D>(ctx, dependent, name).await,
        BuildRef::Function(name) => latest::<S, Function, D>(ctx, dependent, name).await,
        BuildRef::Container(name) => latest::<S, Container, D>(ctx, dependent, name).await,
    }
}

async fn latest<S: ObjectStore, B: Object + Buildable, D: Object>(
    ctx: &Context<S>,
    dependent: &D,
    name: &str,
) -> Result<Option<String>, Error> {
    let key = ObjectKey::new(dependent.namespace().unwrap_or_default(), name);
    ctx.track::<B, D>(&key, dependent);
    match get_opt::<S, B>(&*ctx.store, &key).await? {
        None => Ok(None),
        Some(b) => match b.latest_image() {
            Some(image) => Ok(Some(image.to_string())),
            None => Err(Error::not_ready(format!("{} {:?} has no latest image yet", B::kind(&()), name))),
        },
    }
}

/// Image of the first container of a pod template, if set.
pub(crate) fn template_image(template: Option<&PodTemplateSpec>) -> Option<String> {
    template?
        .spec
        .as_ref()?
        .containers
        .first()?
        .image
        .clone()
        .filter(|i| !i.is_empty())
}

/// Image for a runtime resource: the build reference wins over the template.
/// `Ok(None)` means the referenced build resource does not exist yet or no
/// image is configured at all.
pub(crate) async fn runtime_image<S: ObjectStore, D: Object>(
    ctx: &Context<S>,
    dependent: &D,
    build: Option<BuildRef<'_>>,
    template: Option<&PodTemplateSpec>,
) -> Result<Option<String>, Error> {
    match build {
        Some(b) => build_image(ctx, dependent, b).await,
        None => Ok(template_image(template)),
    }
}
