//! ModelCache implementation with single-flight loading and idle eviction.

use futures::future::{BoxFuture, FutureExt, Shared};
use modelhub_abstraction::ModelError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock, oneshot};
use tracing::{debug, error, info, warn};

use super::config::{CacheConfig, CacheConfigError};
use super::error::CacheError;
use super::lease::ModelLease;
use super::types::{CacheCounters, CacheEntry, CacheStats, ModelId, ModelLocator};
use crate::clock::{Clock, SystemClock};
use crate::dispose::{DeviceReclaimer, DisposalHook};
use crate::handle::ModelHandle;
use crate::loader::ModelLoader;

type LoadFuture = Shared<BoxFuture<'static, Result<(), CacheError>>>;

/// Model cache shared by every consumer of loaded models.
///
/// Constructed once at startup and handed around as `Arc<ModelCache>`.
pub struct ModelCache {
    /// The cache storage (identity -> cached model).
    entries: Arc<RwLock<HashMap<ModelId, CacheEntry>>>,
    /// Loads currently running, one per identity.
    in_flight: Mutex<HashMap<ModelId, LoadFuture>>,
    /// When the last sweep that actually ran was requested.
    last_sweep: Mutex<Option<Instant>>,
    loader: Arc<ModelLoader>,
    disposal: Arc<dyn DisposalHook>,
    clock: Arc<dyn Clock>,
    /// Reference point for entry access times.
    epoch: Instant,
    config: CacheConfig,
    counters: Arc<CacheCounters>,
}

impl ModelCache {
    /// Create a new model cache.
    ///
    /// Evicted models are disposed through a [`DeviceReclaimer`] built on the
    /// loader's runtime, and time comes from the system clock.
    ///
    /// # Errors
    /// Returns `CacheConfigError` if the configuration is invalid.
    pub fn new(config: CacheConfig, loader: ModelLoader) -> Result<Self, CacheConfigError> {
        config.validate()?;

        let disposal = Arc::new(DeviceReclaimer::new(Arc::clone(loader.runtime())));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Ok(Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            in_flight: Mutex::new(HashMap::new()),
            last_sweep: Mutex::new(None),
            loader: Arc::new(loader),
            disposal,
            epoch: clock.now(),
            clock,
            config,
            counters: Arc::new(CacheCounters::default()),
        })
    }

    /// Use a different time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.epoch = clock.now();
        self.clock = clock;
        self
    }

    /// Use a different disposal routine for evicted models.
    #[must_use]
    pub fn with_disposal_hook(mut self, disposal: Arc<dyn DisposalHook>) -> Self {
        self.disposal = disposal;
        self
    }

    /// Borrow the model for `identity`, loading it from `locator` on a miss.
    ///
    /// A cached model always wins over the locator. Concurrent misses on the
    /// same identity share one load and all see its outcome; misses on
    /// different identities load in parallel. A failed load leaves the cache
    /// unchanged.
    ///
    /// # Errors
    /// Returns `CacheError::NotFound` when the file is missing,
    /// `CacheError::LoadFailed` when the runtime rejects it, and
    /// `CacheError::LoadTimeout` when the load exceeds the configured timeout.
    pub async fn get_or_load(
        &self,
        identity: ModelId,
        locator: &ModelLocator,
    ) -> Result<ModelLease, CacheError> {
        if let Some(lease) = self.lease_cached(identity).await {
            CacheCounters::bump(&self.counters.hits);
            debug!(identity = %identity, "Cache hit");
            return Ok(lease);
        }

        CacheCounters::bump(&self.counters.misses);
        debug!(
            identity = %identity,
            folder = %locator.folder,
            filename = %locator.filename,
            "Cache miss, loading model"
        );

        loop {
            let load = self.join_or_start_load(identity, locator).await;
            let outcome = load.clone().await;
            self.finish_load(identity, &load).await;
            outcome?;

            if let Some(lease) = self.lease_cached(identity).await {
                return Ok(lease);
            }
            // Swept between insertion and borrow; load it again.
            debug!(identity = %identity, "Model evicted before it was borrowed, reloading");
        }
    }

    /// Evict models idle for longer than `max_age` as of `now`.
    ///
    /// Skipped, returning 0, when the previous sweep ran less than the
    /// configured minimum interval before `now`. Models that are currently
    /// borrowed are left in place and retried on a later sweep. Evicted
    /// handles are removed from the map before they are disposed, and a
    /// failing disposal does not stop the rest of the sweep.
    ///
    /// # Returns
    /// The number of models evicted.
    pub async fn sweep(&self, now: Instant, max_age: Duration) -> usize {
        let mut last_sweep = self.last_sweep.lock().await;
        if let Some(previous) = *last_sweep {
            let since = now.saturating_duration_since(previous);
            if since < self.config.sweep_min_interval() {
                CacheCounters::bump(&self.counters.sweeps_throttled);
                debug!(since_last_secs = since.as_secs(), "Sweep throttled");
                return 0;
            }
        }
        CacheCounters::bump(&self.counters.sweeps_run);

        let (evicted, deferred, remaining) = {
            let mut entries = self.entries.write().await;
            let stale: Vec<(ModelId, bool)> = entries
                .iter()
                .filter(|(_, entry)| entry.idle_for(self.epoch, now) > max_age)
                .map(|(identity, entry)| (*identity, entry.handle.in_use() > 0))
                .collect();

            let mut evicted = Vec::new();
            let mut deferred = 0;
            for (identity, in_use) in stale {
                if in_use {
                    deferred += 1;
                    debug!(identity = %identity, "Stale model in use, deferring eviction");
                } else if let Some(entry) = entries.remove(&identity) {
                    evicted.push(entry.handle);
                }
            }
            (evicted, deferred, entries.len())
        };

        let count = evicted.len();
        CacheCounters::add(&self.counters.evictions, count);
        CacheCounters::add(&self.counters.deferred_evictions, deferred);
        *last_sweep = Some(now);
        drop(last_sweep);

        info!(
            evicted = count,
            deferred,
            cache_size = remaining,
            max_age_secs = max_age.as_secs(),
            "Swept model cache"
        );

        dispose_all(
            Arc::clone(&self.disposal),
            Arc::clone(&self.counters),
            evicted,
        )
        .await;
        count
    }

    /// Sweep as of the cache clock's current time with an explicit max age.
    pub async fn sweep_older_than(&self, max_age: Duration) -> usize {
        self.sweep(self.clock.now(), max_age).await
    }

    /// Sweep as of now with the configured max age.
    pub async fn sweep_stale(&self) -> usize {
        self.sweep_older_than(self.config.max_age()).await
    }

    /// Number of cached models.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether no model is cached.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Whether a model is cached for `identity`. Does not count as an access.
    pub async fn contains(&self, identity: ModelId) -> bool {
        self.entries.read().await.contains_key(&identity)
    }

    /// Get current cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let size = self.len().await;
        self.counters.snapshot(size)
    }

    /// Get the cache configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The loader used on misses.
    #[must_use]
    pub fn loader(&self) -> &ModelLoader {
        &self.loader
    }

    /// Touch and borrow a cached entry.
    ///
    /// The borrow is taken under the read lock, so a concurrent sweep either
    /// sees it or has already removed the entry.
    async fn lease_cached(&self, identity: ModelId) -> Option<ModelLease> {
        let entries = self.entries.read().await;
        let entry = entries.get(&identity)?;
        entry.touch(self.epoch, self.clock.now());
        Some(ModelLease::acquire(Arc::clone(&entry.handle)))
    }

    async fn join_or_start_load(&self, identity: ModelId, locator: &ModelLocator) -> LoadFuture {
        let mut in_flight = self.in_flight.lock().await;
        if let Some(load) = in_flight.get(&identity) {
            debug!(identity = %identity, "Joining in-flight load");
            return load.clone();
        }
        let load = self.load_task(identity, locator.clone()).shared();
        in_flight.insert(identity, load.clone());
        load
    }

    async fn finish_load(&self, identity: ModelId, load: &LoadFuture) {
        let mut in_flight = self.in_flight.lock().await;
        let current = in_flight.get(&identity);
        if current.is_some_and(|current| current.ptr_eq(load)) {
            in_flight.remove(&identity);
        }
    }

    /// The load shared by every caller that missed on `identity`.
    fn load_task(
        &self,
        identity: ModelId,
        locator: ModelLocator,
    ) -> BoxFuture<'static, Result<(), CacheError>> {
        let entries = Arc::clone(&self.entries);
        let loader = Arc::clone(&self.loader);
        let disposal = Arc::clone(&self.disposal);
        let clock = Arc::clone(&self.clock);
        let counters = Arc::clone(&self.counters);
        let epoch = self.epoch;
        let timeout = self.config.load_timeout();

        async move {
            // A previous load may have finished after our fast-path miss.
            if entries.read().await.contains_key(&identity) {
                return Ok(());
            }

            // The load runs in its own task so a result that arrives after the
            // timeout, or after every waiter went away, is still disposed.
            let (tx, mut rx) = oneshot::channel();
            let late_disposal = Arc::clone(&disposal);
            let late_counters = Arc::clone(&counters);
            tokio::spawn(async move {
                let loaded = loader.load(identity, &locator).await.map(Arc::new);
                if let Err(Ok(handle)) = tx.send(loaded) {
                    warn!(
                        identity = %identity,
                        "Model loaded after its waiters gave up, disposing"
                    );
                    dispose_all(late_disposal, late_counters, vec![handle]).await;
                }
            });

            let loaded = match tokio::time::timeout(timeout, &mut rx).await {
                Ok(received) => received.unwrap_or_else(|_| {
                    Err(CacheError::LoadFailed {
                        identity,
                        source: ModelError::Other("load task ended without a result".to_string()),
                    })
                }),
                Err(_) => {
                    rx.close();
                    // A result that raced the deadline is kept rather than wasted.
                    rx.try_recv()
                        .unwrap_or(Err(CacheError::LoadTimeout { identity, timeout }))
                }
            };

            let handle = match loaded {
                Ok(handle) => handle,
                Err(e) => {
                    if !e.is_not_found() {
                        CacheCounters::bump(&counters.load_failures);
                        error!(identity = %identity, error = %e, "Model load failed");
                    }
                    return Err(e);
                }
            };
            CacheCounters::bump(&counters.loads);

            let mut map = entries.write().await;
            if map.contains_key(&identity) {
                drop(map);
                warn!(identity = %identity, "Model already cached, discarding duplicate load");
                dispose_all(disposal, counters, vec![handle]).await;
                return Ok(());
            }
            map.insert(identity, CacheEntry::new(handle, epoch, clock.now()));
            info!(identity = %identity, cache_size = map.len(), "Model cached");
            Ok(())
        }
        .boxed()
    }
}

/// Dispose handles nobody can reach any more on the blocking pool.
///
/// Each handle is disposed at most once; a failing disposal is counted and
/// logged without stopping the rest.
async fn dispose_all(
    disposal: Arc<dyn DisposalHook>,
    counters: Arc<CacheCounters>,
    handles: Vec<Arc<ModelHandle>>,
) {
    if handles.is_empty() {
        return;
    }
    let task = tokio::task::spawn_blocking(move || {
        for handle in &handles {
            dispose_handle(disposal.as_ref(), &counters, handle);
        }
    });
    if let Err(e) = task.await {
        error!(error = %e, "Model disposal task failed");
    }
}

fn dispose_handle(disposal: &dyn DisposalHook, counters: &CacheCounters, handle: &ModelHandle) {
    if !handle.mark_disposed() {
        return;
    }
    match disposal.dispose(handle) {
        Ok(()) => info!(identity = %handle.identity(), "Disposed evicted model"),
        Err(e) => {
            CacheCounters::bump(&counters.disposal_failures);
            warn!(identity = %handle.identity(), error = %e, "Failed to dispose evicted model");
        }
    }
}

impl std::fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCache")
            .field("loader", &self.loader)
            .field("clock", &self.clock)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::mock::MockRuntime;
    use tempfile::TempDir;

    const MINUTE: Duration = Duration::from_secs(60);

    struct Fixture {
        _temp: TempDir,
        runtime: Arc<MockRuntime>,
        clock: Arc<ManualClock>,
        cache: ModelCache,
    }

    impl Fixture {
        async fn lease(&self, id: i64, filename: &str) -> Result<ModelLease, CacheError> {
            let locator = ModelLocator::new("models/cls", filename);
            self.cache.get_or_load(ModelId(id), &locator).await
        }
    }

    fn fixture(runtime: MockRuntime, config: CacheConfig) -> Fixture {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("models/cls");
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["a.pt", "b.pt", "bad.pt"] {
            std::fs::write(dir.join(name), b"weights").unwrap();
        }

        let runtime = Arc::new(runtime);
        let clock = Arc::new(ManualClock::new());
        let loader = ModelLoader::new(runtime.clone()).with_root(temp.path());
        let cache = ModelCache::new(config, loader)
            .unwrap()
            .with_clock(clock.clone());
        Fixture {
            _temp: temp,
            runtime,
            clock,
            cache,
        }
    }

    #[tokio::test]
    async fn test_cache_hit_returns_same_instance() {
        let fx = fixture(MockRuntime::new(), CacheConfig::default());

        let first = fx.lease(1, "a.pt").await.unwrap();
        let second = fx.lease(1, "a.pt").await.unwrap();

        assert!(std::ptr::eq(first.handle(), second.handle()));
        assert_eq!(fx.runtime.construct_count(), 1);

        let stats = fx.cache.stats().await;
        assert_eq!(stats.total_hits, 1);
        assert_eq!(stats.total_misses, 1);
        assert_eq!(stats.total_loads, 1);
        assert_eq!(stats.cache_size, 1);
    }

    #[tokio::test]
    async fn test_same_filename_different_identity_loads_twice() {
        let fx = fixture(MockRuntime::new(), CacheConfig::default());

        let first = fx.lease(1, "a.pt").await.unwrap();
        let second = fx.lease(2, "a.pt").await.unwrap();

        assert!(!std::ptr::eq(first.handle(), second.handle()));
        assert_eq!(fx.runtime.construct_count(), 2);
        assert_eq!(fx.cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_load_failed_leaves_cache_unchanged() {
        let runtime = MockRuntime::new().with_failing_file("bad.pt");
        let fx = fixture(runtime, CacheConfig::default());

        let err = fx.lease(4, "bad.pt").await.unwrap_err();

        assert!(matches!(
            err,
            CacheError::LoadFailed {
                identity: ModelId(4),
                source: ModelError::LoadFailed(_),
            }
        ));
        assert!(fx.cache.is_empty().await);
        assert_eq!(fx.cache.stats().await.total_load_failures, 1);

        // Permanent failure: a second request tries again and fails again.
        assert!(fx.lease(4, "bad.pt").await.is_err());
        assert_eq!(fx.runtime.construct_count(), 2);
    }

    #[tokio::test]
    async fn test_sweep_on_empty_cache() {
        let fx = fixture(MockRuntime::new(), CacheConfig::default());
        assert_eq!(fx.cache.sweep(fx.clock.now(), 45 * MINUTE).await, 0);
        assert_eq!(fx.cache.stats().await.sweeps_run, 1);
    }

    #[tokio::test]
    async fn test_hit_refreshes_last_access() {
        let fx = fixture(MockRuntime::new(), CacheConfig::default());

        drop(fx.lease(1, "a.pt").await.unwrap());
        fx.clock.advance(40 * MINUTE);
        drop(fx.lease(1, "a.pt").await.unwrap());
        fx.clock.advance(40 * MINUTE);

        // 80 minutes since load, 40 since the last hit.
        assert_eq!(fx.cache.sweep(fx.clock.now(), 45 * MINUTE).await, 0);
        assert!(fx.cache.contains(ModelId(1)).await);
    }

    #[tokio::test]
    async fn test_sweep_stale_uses_configured_max_age() {
        let config = CacheConfig {
            max_age_secs: 600,
            ..CacheConfig::default()
        };
        let fx = fixture(MockRuntime::new(), config);

        drop(fx.lease(1, "a.pt").await.unwrap());
        fx.clock.advance(11 * MINUTE);

        assert_eq!(fx.cache.sweep_stale().await, 1);
        assert!(fx.cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_evicted_model_is_reloaded_on_next_request() {
        let fx = fixture(MockRuntime::new(), CacheConfig::default());

        let first = fx.lease(1, "a.pt").await.unwrap();
        let first_handle = Arc::clone(first.shared());
        drop(first);
        fx.clock.advance(50 * MINUTE);
        assert_eq!(fx.cache.sweep_older_than(45 * MINUTE).await, 1);
        assert!(first_handle.is_disposed());

        let second = fx.lease(1, "a.pt").await.unwrap();
        assert!(!std::ptr::eq(Arc::as_ptr(&first_handle), second.handle()));
        assert!(!second.is_disposed());
        assert_eq!(fx.runtime.construct_count(), 2);
    }
}
