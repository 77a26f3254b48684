//! Riff controllers: one reconciler per platform kind plus the watch wiring
//! that feeds it.
//!
//! Every reconciler is built from a [`Context`]; `<kind>::controller(&ctx)`
//! returns a ready-to-run [`Controller`] and `<kind>::reconciler(&ctx)` the bare
//! reconciler, which is what the tests drive.

#![forbid(unsafe_code)]

use std::sync::Arc;

use riff_core::{settings, ObjectKey};
use riff_kubehub::{Object, ObjectStore};
use riff_runtime::{reference_of, reference_to, Controller, Tracker};

pub mod adapter;
pub mod build;
pub mod cluster_builder;
pub mod container;
pub mod core_deployer;
pub mod knative_deployer;
pub mod processor;
mod resolve;

/// Process-wide settings shared by every reconciler.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Namespace of the platform's own config maps.
    pub system_namespace: String,
}

impl Default for Settings {
    fn default() -> Self { Self { system_namespace: settings::SYSTEM_NAMESPACE.to_string() } }
}

/// Store, tracker and settings handed to every reconciler.
pub struct Context<S> {
    pub store: Arc<S>,
    pub tracker: Arc<Tracker>,
    pub settings: Arc<Settings>,
}

impl<S> Clone for Context<S> {
    fn clone(&self) -> Self {
        Self { store: Arc::clone(&self.store), tracker: Arc::clone(&self.tracker), settings: Arc::clone(&self.settings) }
    }
}

impl<S: ObjectStore> Context<S> {
    pub fn new(store: Arc<S>, tracker: Arc<Tracker>, settings: Settings) -> Self {
        Self { store, tracker, settings: Arc::new(settings) }
    }

    /// Record that `dependent` reads the `R` at `key`.
    pub(crate) fn track<R: Object, D: Object>(&self, key: &ObjectKey, dependent: &D) {
        self.tracker.track(reference_to::<R>(key), reference_of(dependent));
    }
}

/// Every controller of the platform, in start-up order.
pub fn controllers<S: ObjectStore>(ctx: &Context<S>) -> Vec<Controller<S>> {
    vec![
        build::application_controller(ctx),
        build::function_controller(ctx),
        container::controller(ctx),
        cluster_builder::controller(ctx),
        core_deployer::controller(ctx),
        knative_deployer::controller(ctx),
        adapter::controller(ctx),
        processor::controller(ctx),
    ]
}
