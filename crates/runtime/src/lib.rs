//! Riff runtime: everything a reconciler needs around its sync function.
//! Keys flow from watch sources through a coalescing [`WorkQueue`] to worker
//! tasks; failures are retried with per-key [`Backoff`]; the [`Tracker`]
//! turns referent changes into dependent keys.

#![forbid(unsafe_code)]

pub mod backoff;
pub mod controller;
pub mod error;
pub mod owner;
pub mod queue;
pub mod reconciler;
pub mod tracker;

pub use backoff::Backoff;
pub use controller::Controller;
pub use error::Error;
pub use owner::{controller_ref, is_controlled_by, reference_of, reference_to, set_controller};
pub use queue::WorkQueue;
pub use reconciler::{ParentReconciler, ParentSync, Reconciler};
pub use tracker::Tracker;
