//! Turns a locator into a loaded [`ModelHandle`].

use modelhub_abstraction::{ModelError, ModelRuntime};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, ModelId, ModelLocator};
use crate::handle::ModelHandle;

/// Filesystem queries the loader needs.
pub trait FileSystem: Send + Sync + std::fmt::Debug {
    /// Whether `path` exists.
    fn exists(&self, path: &Path) -> bool;
}

/// The local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// Resolves locators under a model root and constructs models through the runtime.
pub struct ModelLoader {
    runtime: Arc<dyn ModelRuntime>,
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
}

impl ModelLoader {
    /// Create a loader resolving paths relative to the working directory.
    #[must_use]
    pub fn new(runtime: Arc<dyn ModelRuntime>) -> Self {
        Self {
            runtime,
            fs: Arc::new(LocalFileSystem),
            root: PathBuf::from("."),
        }
    }

    /// Resolve locators under `root` instead of the working directory.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Use a different filesystem for existence checks.
    #[must_use]
    pub fn with_file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    /// The runtime models are constructed with.
    #[must_use]
    pub fn runtime(&self) -> &Arc<dyn ModelRuntime> {
        &self.runtime
    }

    /// The full path a locator resolves to.
    #[must_use]
    pub fn resolve(&self, locator: &ModelLocator) -> PathBuf {
        locator.resolve(&self.root)
    }

    /// Load the model a locator points at.
    ///
    /// A missing file returns `NotFound` before the runtime is touched. The
    /// runtime call itself runs on the blocking pool. If the runtime reports an
    /// accelerator the model is moved there; a failed move is logged and the
    /// model stays where the runtime put it.
    ///
    /// # Errors
    /// Returns `CacheError::NotFound` or `CacheError::LoadFailed`.
    pub async fn load(
        &self,
        identity: ModelId,
        locator: &ModelLocator,
    ) -> Result<ModelHandle, CacheError> {
        let path = self.resolve(locator);
        if !self.fs.exists(&path) {
            debug!(identity = %identity, path = %path.display(), "Model file not found");
            return Err(CacheError::NotFound { identity, path });
        }

        let runtime = Arc::clone(&self.runtime);
        let load_path = path.clone();
        let model = tokio::task::spawn_blocking(move || {
            let model = runtime.construct_from_path(&load_path)?;
            if let Some(device) = runtime.accelerator() {
                match model.place_on_device(device) {
                    Ok(()) => debug!(identity = %identity, %device, "Model placed on accelerator"),
                    Err(e) => warn!(
                        identity = %identity,
                        %device,
                        error = %e,
                        "Device placement failed, keeping model on default device"
                    ),
                }
            }
            Ok::<_, ModelError>(model)
        })
        .await
        .map_err(|e| CacheError::LoadFailed {
            identity,
            source: ModelError::Other(format!("load task failed: {e}")),
        })?
        .map_err(|source| CacheError::LoadFailed { identity, source })?;

        info!(
            identity = %identity,
            path = %path.display(),
            device = %model.device(),
            "Model loaded"
        );
        Ok(ModelHandle::new(identity, path, model))
    }
}

impl std::fmt::Debug for ModelLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelLoader")
            .field("fs", &self.fs)
            .field("root", &self.root)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRuntime;
    use modelhub_abstraction::Device;
    use tempfile::TempDir;

    fn model_dir() -> TempDir {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("models/cls")).unwrap();
        std::fs::write(temp.path().join("models/cls/a.pt"), b"weights").unwrap();
        std::fs::write(temp.path().join("models/cls/bad.pt"), b"garbage").unwrap();
        temp
    }

    fn cls(filename: &str) -> ModelLocator {
        ModelLocator::new("models/cls", filename)
    }

    #[tokio::test]
    async fn test_load_missing_file_skips_runtime() {
        let temp = model_dir();
        let runtime = Arc::new(MockRuntime::new());
        let loader = ModelLoader::new(runtime.clone()).with_root(temp.path());

        let err = loader.load(ModelId(1), &cls("missing.pt")).await;

        assert!(matches!(err, Err(CacheError::NotFound { .. })));
        assert_eq!(runtime.construct_count(), 0);
    }

    #[tokio::test]
    async fn test_load_tags_handle_with_identity() {
        let temp = model_dir();
        let loader = ModelLoader::new(Arc::new(MockRuntime::new()))
            .with_root(temp.path());

        let handle = loader.load(ModelId(7), &cls("a.pt")).await.unwrap();

        assert_eq!(handle.identity(), ModelId(7));
        assert_eq!(handle.path(), temp.path().join("models/cls/a.pt"));
        assert_eq!(handle.device(), Device::Cpu);
    }

    #[tokio::test]
    async fn test_load_failure_is_typed() {
        let temp = model_dir();
        let runtime = MockRuntime::new().with_failing_file("bad.pt");
        let loader = ModelLoader::new(Arc::new(runtime)).with_root(temp.path());

        let err = loader.load(ModelId(2), &cls("bad.pt")).await;

        assert!(matches!(
            err,
            Err(CacheError::LoadFailed {
                identity: ModelId(2),
                source: ModelError::LoadFailed(_),
            })
        ));
    }

    #[tokio::test]
    async fn test_load_places_model_on_accelerator() {
        let temp = model_dir();
        let runtime = MockRuntime::new().with_accelerator(Device::Cuda(0));
        let loader = ModelLoader::new(Arc::new(runtime)).with_root(temp.path());

        let handle = loader.load(ModelId(1), &cls("a.pt")).await.unwrap();

        assert_eq!(handle.device(), Device::Cuda(0));
    }

    #[tokio::test]
    async fn test_failed_placement_still_loads() {
        let temp = model_dir();
        let runtime = MockRuntime::new()
            .with_accelerator(Device::Cuda(0))
            .with_failing_placement();
        let loader = ModelLoader::new(Arc::new(runtime)).with_root(temp.path());

        let handle = loader.load(ModelId(1), &cls("a.pt")).await.unwrap();

        assert_eq!(handle.device(), Device::Cpu);
    }
}
