use std::sync::Mutex;
use std::time::Duration;

use riff_core::ObjectKey;
use rustc_hash::FxHashMap;

/// Per-key exponential backoff: `base * 2^failures`, capped at `max`.
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: Mutex<FxHashMap<ObjectKey, u32>>,
}

impl Default for Backoff {
    fn default() -> Self { Self::new(Duration::from_millis(5), Duration::from_secs(1000)) }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self { Self { base, max, failures: Mutex::new(FxHashMap::default()) } }

    /// Delay before the next retry of `key`, counting this failure.
    pub fn next(&self, key: &ObjectKey) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(|p| p.into_inner());
        let n = failures.entry(key.clone()).or_insert(0);
        let exp = (*n).min(31);
        *n = n.saturating_add(1);
        self.base.checked_mul(1u32 << exp).unwrap_or(self.max).min(self.max)
    }

    pub fn retries(&self, key: &ObjectKey) -> u32 {
        self.failures.lock().unwrap_or_else(|p| p.into_inner()).get(key).copied().unwrap_or(0)
    }

    /// Reset after a successful pass.
    pub fn forget(&self, key: &ObjectKey) {
        self.failures.lock().unwrap_or_else(|p| p.into_inner()).remove(key);
    }
}
