//! Core data types for model caching.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::handle::ModelHandle;

/// Identity of a logical model record.
///
/// This is the database id of the record, not its filename: two records may
/// point at files with the same name in different folders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(pub i64);

impl From<i64> for ModelId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Where to find a model file on a cache miss.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelLocator {
    /// Folder relative to the model root (e.g. `models/cls`).
    pub folder: String,
    /// File name inside the folder.
    pub filename: String,
}

impl ModelLocator {
    /// Create a new locator.
    pub fn new(folder: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            filename: filename.into(),
        }
    }

    /// Resolve the locator against a model root directory.
    #[must_use]
    pub fn resolve(&self, root: &Path) -> PathBuf {
        root.join(&self.folder).join(&self.filename)
    }
}

/// A cached model entry.
///
/// `last_access` is stored as nanoseconds since the cache's epoch so hits can
/// refresh it under the shared read lock.
#[derive(Debug)]
pub(crate) struct CacheEntry {
    pub(crate) handle: Arc<ModelHandle>,
    last_access: AtomicU64,
}

impl CacheEntry {
    pub(crate) fn new(handle: Arc<ModelHandle>, epoch: Instant, now: Instant) -> Self {
        Self {
            handle,
            last_access: AtomicU64::new(nanos_since(epoch, now)),
        }
    }

    /// Record an access at `now`. Concurrent touches keep the latest value.
    pub(crate) fn touch(&self, epoch: Instant, now: Instant) {
        self.last_access.fetch_max(nanos_since(epoch, now), Ordering::SeqCst);
    }

    /// Time elapsed between the last access and `now`.
    pub(crate) fn idle_for(&self, epoch: Instant, now: Instant) -> Duration {
        let last = Duration::from_nanos(self.last_access.load(Ordering::SeqCst));
        now.saturating_duration_since(epoch).saturating_sub(last)
    }
}

fn nanos_since(epoch: Instant, now: Instant) -> u64 {
    u64::try_from(now.saturating_duration_since(epoch).as_nanos())
        .unwrap_or(u64::MAX)
}

/// Running counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) loads: AtomicU64,
    pub(crate) load_failures: AtomicU64,
    pub(crate) evictions: AtomicU64,
    pub(crate) deferred_evictions: AtomicU64,
    pub(crate) sweeps_run: AtomicU64,
    pub(crate) sweeps_throttled: AtomicU64,
    pub(crate) disposal_failures: AtomicU64,
}

impl CacheCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, cache_size: usize) -> CacheStats {
        CacheStats {
            total_hits: self.hits.load(Ordering::Relaxed),
            total_misses: self.misses.load(Ordering::Relaxed),
            total_loads: self.loads.load(Ordering::Relaxed),
            total_load_failures: self.load_failures.load(Ordering::Relaxed),
            total_evictions: self.evictions.load(Ordering::Relaxed),
            total_deferred_evictions: self.deferred_evictions.load(Ordering::Relaxed),
            sweeps_run: self.sweeps_run.load(Ordering::Relaxed),
            sweeps_throttled: self.sweeps_throttled.load(Ordering::Relaxed),
            disposal_failures: self.disposal_failures.load(Ordering::Relaxed),
            cache_size,
        }
    }
}

/// Cache statistics for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups served from the cache.
    pub total_hits: u64,
    /// Lookups that had to wait for a load.
    pub total_misses: u64,
    /// Successful loader invocations.
    pub total_loads: u64,
    /// Loader invocations that failed or timed out.
    pub total_load_failures: u64,
    /// Entries removed by sweeps.
    pub total_evictions: u64,
    /// Stale entries left in place because they were in use.
    pub total_deferred_evictions: u64,
    /// Sweeps that inspected the cache.
    pub sweeps_run: u64,
    /// Sweeps skipped by the minimum-interval throttle.
    pub sweeps_throttled: u64,
    /// Disposal hook failures (logged and swallowed).
    pub disposal_failures: u64,
    /// Current number of models in cache.
    pub cache_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::ModelHandle;
    use crate::mock::MockModel;
    use modelhub_abstraction::Device;

    fn handle() -> Arc<ModelHandle> {
        Arc::new(ModelHandle::new(
            ModelId(1),
            PathBuf::from("models/a.pt"),
            Box::new(MockModel::new("a", Device::Cpu)),
        ))
    }

    #[test]
    fn test_locator_resolve() {
        let locator = ModelLocator::new("models/cls", "a.pt");
        assert_eq!(
            locator.resolve(Path::new("/srv")),
            PathBuf::from("/srv/models/cls/a.pt")
        );
    }

    #[test]
    fn test_entry_touch_keeps_most_recent() {
        let epoch = Instant::now();
        let entry = CacheEntry::new(handle(), epoch, epoch);

        let later = epoch + Duration::from_secs(600);
        entry.touch(epoch, later);
        // An older touch arriving late must not move the timestamp backwards.
        entry.touch(epoch, epoch + Duration::from_secs(60));

        let now = epoch + Duration::from_secs(900);
        assert_eq!(entry.idle_for(epoch, now), Duration::from_secs(300));
    }

    #[test]
    fn test_model_id_display_and_serde() {
        let id = ModelId::from(7);
        assert_eq!(id.to_string(), "7");
        assert_eq!(serde_json::to_string(&id).unwrap(), "7");
    }

    #[test]
    fn test_cache_stats_default() {
        let stats = CacheStats::default();
        assert_eq!(stats.total_hits, 0);
        assert_eq!(stats.total_misses, 0);
        assert_eq!(stats.total_evictions, 0);
        assert_eq!(stats.cache_size, 0);
    }
}
