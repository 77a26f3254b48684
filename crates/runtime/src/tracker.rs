use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use metrics::gauge;
use riff_core::Reference;
use rustc_hash::FxHashMap;
use tracing::trace;

pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Referent -> dependents, each edge expiring `ttl` after its last `track`.
pub struct Tracker {
    ttl: Duration,
    edges: Mutex<FxHashMap<Reference, FxHashMap<Reference, Instant>>>,
}

impl Default for Tracker {
    fn default() -> Self { Self::new(DEFAULT_TTL) }
}

impl Tracker {
    pub fn new(ttl: Duration) -> Self { Self { ttl, edges: Mutex::new(FxHashMap::default()) } }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<Reference, FxHashMap<Reference, Instant>>> {
        self.edges.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Record that `dependent` must be reconciled whenever `referent` changes.
    /// The edge lives for the tracker-wide TTL given to [`Tracker::new`].
    pub fn track(&self, referent: Reference, dependent: Reference) { self.track_for(referent, dependent, self.ttl) }

    /// [`Tracker::track`] with an edge lifetime of `ttl` instead of the tracker default.
    pub fn track_for(&self, referent: Reference, dependent: Reference, ttl: Duration) {
        self.track_at(referent, dependent, Instant::now(), ttl);
    }

    pub(crate) fn track_at(&self, referent: Reference, dependent: Reference, now: Instant, ttl: Duration) {
        trace!(referent = %referent, dependent = %dependent, ttl = ?ttl, "track");
        let mut edges = self.lock();
        edges.entry(referent).or_default().insert(dependent, now + ttl);
        gauge!("riff_tracker_referents", edges.len() as f64);
    }

    /// Live dependents of `referent`, sorted. Expired edges are dropped.
    pub fn lookup(&self, referent: &Reference) -> Vec<Reference> { self.lookup_at(referent, Instant::now()) }

    pub(crate) fn lookup_at(&self, referent: &Reference, now: Instant) -> Vec<Reference> {
        let mut edges = self.lock();
        let Some(deps) = edges.get_mut(referent) else { return Vec::new() };
        deps.retain(|_, expires| *expires > now);
        let mut out: Vec<_> = deps.keys().cloned().collect();
        if deps.is_empty() {
            edges.remove(referent);
        }
        out.sort();
        out
    }

    /// Every live edge as `(referent, dependent)`, sorted.
    pub fn edges(&self) -> Vec<(Reference, Reference)> {
        let now = Instant::now();
        let edges = self.lock();
        let mut out: Vec<_> = edges
            .iter()
            .flat_map(|(r, deps)| deps.iter().filter(|(_, e)| **e > now).map(move |(d, _)| (r.clone(), d.clone())))
            .collect();
        out.sort();
        out
    }
}
