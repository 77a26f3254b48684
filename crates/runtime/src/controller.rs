use std::sync::Arc;
use std::time::Instant;

use futures::{future::BoxFuture, FutureExt, StreamExt};
use metrics::{counter, histogram};
use riff_core::ObjectKey;
use riff_kubehub::{key_of, Object, ObjectStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::owner::{controller_of, reference_of};
use crate::{Backoff, Reconciler, Tracker, WorkQueue};

type Source = BoxFuture<'static, ()>;

/// Watches feeding one reconciler through a work queue.
///
/// ```ignore
/// Controller::new(store, reconciler, tracker)
///     .for_kind::<Application>()
///     .owns::<Image>()
///     .tracks::<ConfigMap>()
///     .run(2, shutdown)
///     .await;
/// ```
pub struct Controller<S: ObjectStore> {
    name: &'static str,
    store: Arc<S>,
    reconciler: Arc<dyn Reconciler>,
    tracker: Arc<Tracker>,
    queue: Arc<WorkQueue>,
    backoff: Arc<Backoff>,
    parent: Option<(String, String)>,
    sources: Vec<Source>,
}

impl<S: ObjectStore> Controller<S> {
    pub fn new(store: Arc<S>, reconciler: Arc<dyn Reconciler>, tracker: Arc<Tracker>) -> Self {
        Self {
            name: reconciler.name(),
            store,
            reconciler,
            tracker,
            queue: Arc::new(WorkQueue::new()),
            backoff: Arc::new(Backoff::default()),
            parent: None,
            sources: Vec::new(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    pub fn queue(&self) -> Arc<WorkQueue> { Arc::clone(&self.queue) }

    /// Enqueue every change to the parent kind `P`.
    pub fn for_kind<P: Object>(mut self) -> Self {
        self.parent = Some((P::group(&()).to_string(), P::kind(&()).to_string()));
        self.watches::<P>(|p| vec![key_of(p)])
    }

    /// Enqueue the controlling parent of every changed child of kind `C`.
    pub fn owns<C: Object>(self) -> Self {
        let Some((group, kind)) = self.parent.clone() else {
            warn!(controller = self.name, "owns() before for_kind(); ignoring");
            return self;
        };
        self.watches::<C>(move |child| {
            let meta = child.meta();
            match controller_of(meta) {
                Some(owner) if owner.kind == kind && owner.api_version.starts_with(&format!("{group}/")) => {
                    vec![ObjectKey::new(meta.namespace.clone().unwrap_or_default(), owner.name.clone())]
                }
                _ => Vec::new(),
            }
        })
    }

    /// Enqueue the tracked dependents of every changed object of kind `R`.
    pub fn tracks<R: Object>(self) -> Self {
        let Some((group, kind)) = self.parent.clone() else {
            warn!(controller = self.name, "tracks() before for_kind(); ignoring");
            return self;
        };
        let tracker = Arc::clone(&self.tracker);
        self.watches::<R>(move |obj| {
            tracker
                .lookup(&reference_of(obj))
                .into_iter()
                .filter(|d| d.group == group && d.kind == kind)
                .map(|d| d.key())
                .collect()
        })
    }

    /// Enqueue whatever `map` returns for every changed object of kind `K`.
    pub fn watches<K: Object>(mut self, map: impl Fn(&K) -> Vec<ObjectKey> + Send + Sync + 'static) -> Self {
        let mut events = self.store.watch::<K>("");
        let queue = Arc::clone(&self.queue);
        let name = self.name;
        let kind = K::kind(&()).to_string();
        self.sources.push(
            async move {
                while let Some(ev) = events.next().await {
                    match ev {
                        Ok(ev) => {
                            for key in map(ev.object()) {
                                counter!("riff_workqueue_adds_total", 1, "controller" => name);
                                queue.add(key);
                            }
                        }
                        Err(e) => warn!(controller = name, kind = %kind, error = %e, "watch error"),
                    }
                }
                debug!(controller = name, kind = %kind, "watch ended");
            }
            .boxed(),
        );
        self
    }

    /// Run watch sources and `workers` workers until `shutdown` fires.
    pub async fn run(self, workers: usize, shutdown: CancellationToken) {
        info!(controller = self.name, workers, "controller starting");
        for source in self.sources {
            let token = shutdown.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = source => {}
                }
            });
        }
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers.max(1) {
            let worker = Worker {
                name: self.name,
                reconciler: Arc::clone(&self.reconciler),
                queue: Arc::clone(&self.queue),
                backoff: Arc::clone(&self.backoff),
            };
            handles.push(tokio::spawn(worker.run(shutdown.clone())));
        }
        shutdown.cancelled().await;
        self.queue.shutdown();
        for h in handles {
            let _ = h.await;
        }
        info!(controller = self.name, "controller stopped");
    }
}

struct Worker {
    name: &'static str,
    reconciler: Arc<dyn Reconciler>,
    queue: Arc<WorkQueue>,
    backoff: Arc<Backoff>,
}

impl Worker {
    async fn run(self, shutdown: CancellationToken) {
        loop {
            let key = tokio::select! {
                _ = shutdown.cancelled() => break,
                key = self.queue.get() => match key {
                    Some(key) => key,
                    None => break,
                },
            };
            let span = info_span!("reconcile", controller = self.name, key = %key);
            let start = Instant::now();
            let result = tokio::select! {
                _ = shutdown.cancelled() => {
                    self.queue.done(&key);
                    break;
                }
                r = self.reconciler.reconcile(&key).instrument(span) => r,
            };
            histogram!("riff_reconcile_latency_ms", start.elapsed().as_secs_f64() * 1000.0, "controller" => self.name);
            match result {
                Ok(()) => {
                    counter!("riff_reconcile_total", 1, "controller" => self.name, "result" => "ok");
                    self.backoff.forget(&key);
                }
                Err(e) => {
                    counter!("riff_reconcile_total", 1, "controller" => self.name, "result" => "error");
                    counter!("riff_workqueue_retries_total", 1, "controller" => self.name);
                    let delay = self.backoff.next(&key);
                    warn!(controller = self.name, key = %key, error = %e, retry_in_ms = delay.as_millis() as u64, "reconcile failed");
                    self.queue.add_after(key.clone(), delay);
                }
            }
            self.queue.done(&key);
        }
    }
}
