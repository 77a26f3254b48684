//! Core Deployer: run an image as a plain Deployment behind a Service, with
//! an optional Ingress for external traffic.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend, IngressSpec,
    ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector as MetaSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use riff_apply::{not_owned_message, reconcile_child, ChildOutcome, NOT_OWNED};
use riff_core::{labels, settings, Condition, ConditionStatus, ObjectKey};
use riff_kubehub::{LabelSelector, ObjectStore};
use riff_runtime::{Controller, Error, ParentReconciler, ParentSync};
use riff_schema::build::{Application, Container, Function};
use riff_schema::core_deployer::{
    Addressable, Deployer, IngressPolicy, DEPLOYMENT_READY, INGRESS_READY, SERVICE_READY,
};
use riff_schema::{ref_to, Parent};
use tracing::debug;

use crate::resolve::{self, BuildRef};
use crate::Context;

pub(crate) const HTTP_PORT: i32 = 8080;
const SERVICE_PORT: i32 = 80;

/// Parent labels plus the deployer label.
fn child_labels(parent: &Deployer) -> BTreeMap<String, String> {
    let mut l = parent.labels().clone();
    l.insert(labels::CORE_DEPLOYER.to_string(), parent.name_any());
    l
}

fn selector_labels(parent: &Deployer) -> BTreeMap<String, String> {
    BTreeMap::from([(labels::CORE_DEPLOYER.to_string(), parent.name_any())])
}

/// Point the first container at `image` and give it the serving defaults
/// it does not already declare.
fn handler_container(template: &mut corev1::PodTemplateSpec, image: &str) {
    let spec = template.spec.get_or_insert_with(Default::default);
    if spec.containers.is_empty() {
        spec.containers.push(corev1::Container::default());
    }
    let Some(c) = spec.containers.first_mut() else { return };
    if c.name.is_empty() {
        c.name = "handler".into();
    }
    c.image = Some(image.to_string());
    let ports = c.ports.get_or_insert_with(Vec::new);
    if ports.is_empty() {
        ports.push(corev1::ContainerPort {
            name: Some("http".into()),
            container_port: HTTP_PORT,
            protocol: Some("TCP".into()),
            ..Default::default()
        });
    }
    let env = c.env.get_or_insert_with(Vec::new);
    if !env.iter().any(|e| e.name == "PORT") {
        env.push(corev1::EnvVar { name: "PORT".into(), value: Some(HTTP_PORT.to_string()), ..Default::default() });
    }
    if c.readiness_probe.is_none() {
        c.readiness_probe = Some(corev1::Probe {
            tcp_socket: Some(corev1::TCPSocketAction { port: IntOrString::Int(HTTP_PORT), host: None }),
            ..Default::default()
        });
    }
}

pub(crate) fn desired_deployment(parent: &Deployer, image: &str) -> Deployment {
    let labels = child_labels(parent);
    let mut template = parent.spec.template.clone().unwrap_or_default();
    template.metadata.get_or_insert_with(Default::default).labels.get_or_insert_with(BTreeMap::new).extend(labels.clone());
    handler_container(&mut template, image);
    Deployment {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-deployer-", parent.name_any())),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            selector: MetaSelector { match_labels: Some(selector_labels(parent)), match_expressions: None },
            template,
            ..Default::default()
        }),
        status: None,
    }
}

pub(crate) fn desired_service(parent: &Deployer) -> corev1::Service {
    corev1::Service {
        metadata: ObjectMeta { name: Some(parent.name_any()), labels: Some(child_labels(parent)), ..Default::default() },
        spec: Some(corev1::ServiceSpec {
            selector: Some(selector_labels(parent)),
            ports: Some(vec![corev1::ServicePort {
                name: Some("http".into()),
                port: SERVICE_PORT,
                target_port: Some(IntOrString::Int(HTTP_PORT)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

pub(crate) fn desired_ingress(parent: &Deployer, host: &str, service: &str) -> Ingress {
    let backend = IngressBackend {
        service: Some(IngressServiceBackend {
            name: service.to_string(),
            port: Some(ServiceBackendPort { number: Some(SERVICE_PORT), name: None }),
        }),
        resource: None,
    };
    Ingress {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-deployer-", parent.name_any())),
            labels: Some(child_labels(parent)),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some(host.to_string()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath { path: Some("/".into()), path_type: "Prefix".into(), backend }],
                }),
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// The deployment's `Available` condition, if it reported one.
pub(crate) fn available(d: &Deployment) -> Option<Condition> {
    let c = d.status.as_ref()?.conditions.as_ref()?.iter().find(|c| c.type_ == "Available")?;
    Some(
        Condition::new(c.type_.clone(), ConditionStatus::from_k8s(&c.status))
            .with_reason(c.reason.clone().unwrap_or_default(), c.message.clone().unwrap_or_default()),
    )
}

fn ingress_host(i: &Ingress) -> Option<&str> {
    i.spec.as_ref()?.rules.as_ref()?.first()?.host.as_deref()
}

fn ingress_ready(i: &Ingress) -> bool {
    i.status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .is_some_and(|v| !v.is_empty())
}

pub struct DeployerSync<S> {
    ctx: Context<S>,
}

#[async_trait]
impl<S: ObjectStore> ParentSync for DeployerSync<S> {
    type Parent = Deployer;

    async fn sync(&self, parent: &mut Deployer) -> Result<(), Error> {
        let settings_key = ObjectKey::new(self.ctx.settings.system_namespace.clone(), settings::CORE_SETTINGS);
        let core_settings = resolve::settings_map(&self.ctx, &settings_key, &*parent).await?;
        let domain = resolve::data(&core_settings, settings::DEFAULT_DOMAIN_KEY).unwrap_or(settings::DEFAULT_DOMAIN);

        let spec = parent.spec.clone();
        let build = spec.build.as_ref().and_then(|b| BuildRef::first(&b.application_ref, &b.function_ref, &b.container_ref));
        let Some(image) = resolve::runtime_image(&self.ctx, &*parent, build, spec.template.as_ref()).await? else {
            if build.is_none() {
                return Err(Error::invalid("could not resolve an image"));
            }
            debug!(deployer = %parent.name_any(), "build reference not found; waiting");
            return Ok(());
        };
        parent.status_mut().latest_image = Some(image.clone());

        let name = parent.name_any();
        let namespace = parent.namespace().unwrap_or_default();
        let selector = LabelSelector::eq(labels::CORE_DEPLOYER, name.clone());
        let store = &*self.ctx.store;

        let current = parent.status().and_then(|s| s.deployment_ref.as_ref()).map(|r| r.name.clone());
        match reconcile_child(store, &*parent, &selector, Some(desired_deployment(parent, &image)), current.as_deref()).await? {
            ChildOutcome::NotOwned { name } => {
                parent.status_mut().deployment_ref = None;
                parent.manage().mark_false(DEPLOYMENT_READY, NOT_OWNED, not_owned_message::<Deployment, Deployer>(&name));
                return Ok(());
            }
            ChildOutcome::Live(deployment) => {
                parent.status_mut().deployment_ref = deployment.as_ref().map(|d| ref_to::<Deployment>(&d.name_any()));
                parent.manage().propagate(DEPLOYMENT_READY, deployment.as_ref().and_then(available).as_ref());
            }
        }

        let current = parent.status().and_then(|s| s.service_ref.as_ref()).map(|r| r.name.clone());
        let service = match reconcile_child(store, &*parent, &selector, Some(desired_service(parent)), current.as_deref()).await? {
            ChildOutcome::NotOwned { name } => {
                parent.status_mut().service_ref = None;
                parent.manage().mark_false(SERVICE_READY, NOT_OWNED, not_owned_message::<corev1::Service, Deployer>(&name));
                return Ok(());
            }
            ChildOutcome::Live(service) => service,
        };
        let service_name = service.as_ref().map(|s| s.name_any()).unwrap_or_else(|| name.clone());
        {
            let status = parent.status_mut();
            status.service_ref = service.as_ref().map(|s| ref_to::<corev1::Service>(&s.name_any()));
            status.address = Some(Addressable::url(format!("http://{service_name}.{namespace}.svc.cluster.local")));
        }
        parent.manage().mark_true(SERVICE_READY);

        let host = format!("{name}.{namespace}.{domain}");
        let desired = (spec.ingress_policy == IngressPolicy::External).then(|| desired_ingress(parent, &host, &service_name));
        let current = parent.status().and_then(|s| s.ingress_ref.as_ref()).map(|r| r.name.clone());
        match reconcile_child(store, &*parent, &selector, desired, current.as_deref()).await? {
            ChildOutcome::NotOwned { name } => {
                let status = parent.status_mut();
                status.ingress_ref = None;
                status.url = None;
                parent.manage().mark_false(INGRESS_READY, NOT_OWNED, not_owned_message::<Ingress, Deployer>(&name));
            }
            ChildOutcome::Live(None) => {
                let status = parent.status_mut();
                status.ingress_ref = None;
                status.url = None;
                parent.manage().mark_info(
                    INGRESS_READY,
                    ConditionStatus::False,
                    "IngressNotRequired",
                    "Ingress resource is not required.",
                );
            }
            ChildOutcome::Live(Some(ingress)) => {
                let status = parent.status_mut();
                status.ingress_ref = Some(ref_to::<Ingress>(&ingress.name_any()));
                status.url = ingress_host(&ingress).map(|h| format!("http://{h}"));
                if ingress_ready(&ingress) {
                    parent.manage().mark_true(INGRESS_READY);
                } else {
                    parent.manage().mark_unknown(INGRESS_READY, "IngressNotConfigured", "Ingress has not yet been reconciled.");
                }
            }
        }
        Ok(())
    }
}

pub fn reconciler<S: ObjectStore>(ctx: &Context<S>) -> ParentReconciler<S, DeployerSync<S>> {
    ParentReconciler::new("core-deployer", Arc::clone(&ctx.store), DeployerSync { ctx: ctx.clone() })
}

pub fn controller<S: ObjectStore>(ctx: &Context<S>) -> Controller<S> {
    Controller::new(Arc::clone(&ctx.store), Arc::new(reconciler(ctx)), Arc::clone(&ctx.tracker))
        .for_kind::<Deployer>()
        .owns::<Deployment>()
        .owns::<corev1::Service>()
        .owns::<Ingress>()
        .tracks::<corev1::ConfigMap>()
        .tracks::<Application>()
        .tracks::<Function>()
        .tracks::<Container>()
}
