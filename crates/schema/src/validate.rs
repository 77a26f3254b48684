//! Field validation for the platform kinds, for use by an admission layer.
//! Reconcilers do not depend on it.

use std::fmt;

use k8s_openapi::api::core::v1::PodTemplateSpec;
use thiserror::Error;

use crate::build::{Application, Container, Function, Source};
use crate::{core_deployer, knative, streaming};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind}: {}", .errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
pub struct ValidationError {
    pub kind: String,
    pub errors: Vec<FieldError>,
}

#[derive(Default)]
struct Errors(Vec<FieldError>);

impl Errors {
    fn push(&mut self, path: &str, message: impl Into<String>) {
        self.0.push(FieldError { path: path.to_string(), message: message.into() });
    }

    fn required(&mut self, path: &str, value: &str) {
        if value.is_empty() {
            self.push(path, "missing required field");
        }
    }

    fn into_result(self, kind: &str) -> Result<(), ValidationError> {
        if self.0.is_empty() { Ok(()) } else { Err(ValidationError { kind: kind.to_string(), errors: self.0 }) }
    }
}

pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

fn source(errs: &mut Errors, source: &Option<Source>) {
    let Some(source) = source else { return };
    match &source.git {
        Some(git) => {
            errs.required("spec.source.git.url", &git.url);
            errs.required("spec.source.git.revision", &git.revision);
        }
        None => errs.push("spec.source", "expected exactly one, got neither: git"),
    }
}

fn one_of(errs: &mut Errors, path: &str, fields: &[(&str, &str)]) {
    let set: Vec<_> = fields.iter().filter(|(_, v)| !v.is_empty()).map(|(n, _)| *n).collect();
    match set.len() {
        1 => {}
        0 => {
            let names: Vec<_> = fields.iter().map(|(n, _)| *n).collect();
            errs.push(path, format!("expected exactly one, got neither: {}", names.join(", ")));
        }
        _ => errs.push(path, format!("expected exactly one, got both: {}", set.join(", "))),
    }
}

fn template_image(template: &Option<PodTemplateSpec>) -> &str {
    template
        .as_ref()
        .and_then(|t| t.spec.as_ref())
        .and_then(|s| s.containers.first())
        .and_then(|c| c.image.as_deref())
        .unwrap_or("")
}

fn deployer_source(errs: &mut Errors, build: &Option<core_deployer::Build>, template: &Option<PodTemplateSpec>) {
    let image = template_image(template);
    match build {
        Some(b) => {
            one_of(errs, "spec.build", &[
                ("applicationRef", &b.application_ref),
                ("containerRef", &b.container_ref),
                ("functionRef", &b.function_ref),
            ]);
            if !image.is_empty() {
                errs.push("spec", "expected exactly one, got both: build, template.containers[0].image");
            }
        }
        None if image.is_empty() => errs.push("spec", "expected exactly one, got neither: build, template.containers[0].image"),
        None => {}
    }
}

impl Validate for Application {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errs = Errors::default();
        source(&mut errs, &self.spec.source);
        if self.spec.cache_size.is_some() && self.spec.source.is_none() {
            errs.push("spec.cacheSize", "only valid with spec.source");
        }
        errs.into_result("Application")
    }
}

impl Validate for Function {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errs = Errors::default();
        source(&mut errs, &self.spec.source);
        if self.spec.cache_size.is_some() && self.spec.source.is_none() {
            errs.push("spec.cacheSize", "only valid with spec.source");
        }
        errs.into_result("Function")
    }
}

impl Validate for Container {
    fn validate(&self) -> Result<(), ValidationError> { Errors::default().into_result("Container") }
}

impl Validate for core_deployer::Deployer {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errs = Errors::default();
        deployer_source(&mut errs, &self.spec.build, &self.spec.template);
        errs.into_result("Deployer")
    }
}

impl Validate for knative::Deployer {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errs = Errors::default();
        deployer_source(&mut errs, &self.spec.build, &self.spec.template);
        let scale = &self.spec.scale;
        if scale.min.is_some_and(|m| m < 0) {
            errs.push("spec.scale.min", "must be non-negative");
        }
        if let (Some(min), Some(max)) = (scale.min, scale.max) {
            if max < min {
                errs.push("spec.scale.max", "must be greater than or equal to spec.scale.min");
            }
        }
        errs.into_result("Deployer")
    }
}

impl Validate for knative::Adapter {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errs = Errors::default();
        let b = &self.spec.build;
        one_of(&mut errs, "spec.build", &[
            ("applicationRef", &b.application_ref),
            ("containerRef", &b.container_ref),
            ("functionRef", &b.function_ref),
        ]);
        let t = &self.spec.target;
        one_of(&mut errs, "spec.target", &[("serviceRef", &t.service_ref), ("configurationRef", &t.configuration_ref)]);
        errs.into_result("Adapter")
    }
}

impl Validate for streaming::Processor {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errs = Errors::default();
        let image = template_image(&self.spec.template);
        match &self.spec.build {
            Some(b) => {
                one_of(&mut errs, "spec.build", &[("containerRef", &b.container_ref), ("functionRef", &b.function_ref)]);
                if !image.is_empty() {
                    errs.push("spec", "expected exactly one, got both: build, template.containers[0].image");
                }
            }
            None if image.is_empty() => {
                errs.push("spec", "expected exactly one, got neither: build, template.containers[0].image")
            }
            None => {}
        }
        for (i, input) in self.spec.inputs.iter().enumerate() {
            errs.required(&format!("spec.inputs[{i}].stream"), &input.stream);
        }
        for (i, output) in self.spec.outputs.iter().enumerate() {
            errs.required(&format!("spec.outputs[{i}].stream"), &output.stream);
        }
        errs.into_result("Processor")
    }
}
