use std::sync::Arc;

use async_trait::async_trait;
use kube::Resource;
use riff_core::ObjectKey;
use riff_kubehub::{get_opt, ObjectStore};
use riff_schema::Parent;
use tracing::{debug, warn};

use crate::Error;

/// One reconciliation pass for a key.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    fn name(&self) -> &'static str;
    async fn reconcile(&self, key: &ObjectKey) -> Result<(), Error>;
}

/// Kind-specific part of a parent reconciler: drive children and project
/// their state onto `parent`'s status. The parent is a private copy.
#[async_trait]
pub trait ParentSync: Send + Sync + 'static {
    type Parent: Parent;

    async fn sync(&self, parent: &mut Self::Parent) -> Result<(), Error>;
}

/// Fetch, sync, write status back: the shared shape of every platform
/// reconciler.
pub struct ParentReconciler<S, T> {
    name: &'static str,
    store: Arc<S>,
    sync: T,
}

impl<S: ObjectStore, T: ParentSync> ParentReconciler<S, T> {
    pub fn new(name: &'static str, store: Arc<S>, sync: T) -> Self { Self { name, store, sync } }
}

#[async_trait]
impl<S: ObjectStore, T: ParentSync> Reconciler for ParentReconciler<S, T> {
    fn name(&self) -> &'static str { self.name }

    async fn reconcile(&self, key: &ObjectKey) -> Result<(), Error> {
        let Some(parent) = get_opt::<S, T::Parent>(&*self.store, key).await? else {
            debug!(controller = self.name, key = %key, "parent gone; dropping");
            return Ok(());
        };
        if parent.meta().deletion_timestamp.is_some() {
            debug!(controller = self.name, key = %key, "parent is being deleted");
            return Ok(());
        }

        let mut next = parent.clone();
        next.manage().initialize();
        let result = self.sync.sync(&mut next).await;
        next.set_observed_generation(parent.meta().generation);

        if next.status() != parent.status() {
            if let Err(e) = self.store.update_status(&next).await {
                warn!(controller = self.name, key = %key, error = %e, "status update failed");
                return Err(e.into());
            }
            debug!(controller = self.name, key = %key, "status updated");
        }
        result
    }
}
