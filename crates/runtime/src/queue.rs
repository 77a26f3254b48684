use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use riff_core::ObjectKey;
use rustc_hash::FxHashSet;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Default)]
struct Inner {
    order: VecDeque<ObjectKey>,
    queued: FxHashSet<ObjectKey>,
    processing: FxHashSet<ObjectKey>,
    dirty: FxHashSet<ObjectKey>,
    shutdown: bool,
}

/// Coalescing FIFO of object keys. A key is queued at most once, and a key
/// that is being processed is parked as dirty and requeued on [`done`], so no
/// two workers ever hold the same key.
///
/// [`done`]: WorkQueue::done
#[derive(Default)]
pub struct WorkQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, Inner> { self.inner.lock().unwrap_or_else(|p| p.into_inner()) }

    pub fn add(&self, key: ObjectKey) {
        let mut inner = self.lock();
        if inner.shutdown {
            return;
        }
        if inner.processing.contains(&key) {
            inner.dirty.insert(key);
            return;
        }
        if inner.queued.insert(key.clone()) {
            inner.order.push_back(key);
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Add `key` once `delay` has passed.
    pub fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let q = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            q.add(key);
        });
    }

    /// Next key to process, or `None` once shut down and drained.
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut inner = self.lock();
                if let Some(key) = inner.order.pop_front() {
                    inner.queued.remove(&key);
                    inner.processing.insert(key.clone());
                    return Some(key);
                }
                if inner.shutdown {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Mark `key` finished; requeue it if it was added while processing.
    pub fn done(&self, key: &ObjectKey) {
        let mut inner = self.lock();
        inner.processing.remove(key);
        if inner.dirty.remove(key) && !inner.shutdown && inner.queued.insert(key.clone()) {
            inner.order.push_back(key.clone());
            drop(inner);
            self.notify.notify_one();
        }
    }

    pub fn shutdown(&self) {
        let mut inner = self.lock();
        inner.shutdown = true;
        debug!(pending = inner.order.len(), "work queue shutting down");
        drop(inner);
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize { self.lock().order.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}
