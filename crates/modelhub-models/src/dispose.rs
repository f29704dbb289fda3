//! Releasing evicted models.

use modelhub_abstraction::{ModelError, ModelRuntime};
use std::sync::Arc;
use tracing::debug;

use crate::handle::ModelHandle;

/// Called once for every handle a sweep removes from the cache.
///
/// The handle is no longer reachable through the cache when this runs.
pub trait DisposalHook: Send + Sync {
    /// Free whatever the handle holds.
    ///
    /// # Errors
    /// Errors are logged by the cache and never abort a sweep.
    fn dispose(&self, handle: &ModelHandle) -> Result<(), ModelError>;
}

/// Default hook: releases the model, then asks the runtime to reclaim the
/// accelerator's memory pool when the model lived on one.
pub struct DeviceReclaimer {
    runtime: Arc<dyn ModelRuntime>,
}

impl DeviceReclaimer {
    /// Create a reclaimer for models built by `runtime`.
    #[must_use]
    pub fn new(runtime: Arc<dyn ModelRuntime>) -> Self {
        Self { runtime }
    }
}

impl DisposalHook for DeviceReclaimer {
    fn dispose(&self, handle: &ModelHandle) -> Result<(), ModelError> {
        let device = handle.device();
        handle.model().release()?;
        if device.is_accelerator() {
            self.runtime.reclaim_device_memory(device)?;
            debug!(identity = %handle.identity(), %device, "Reclaimed device memory");
        }
        Ok(())
    }
}

impl std::fmt::Debug for DeviceReclaimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceReclaimer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ModelId;
    use crate::mock::{MockModel, MockRuntime};
    use modelhub_abstraction::Device;
    use std::path::PathBuf;

    #[test]
    fn test_cpu_model_skips_reclaim() {
        let runtime = Arc::new(MockRuntime::new());
        let hook = DeviceReclaimer::new(runtime.clone());
        let handle = ModelHandle::new(
            ModelId(1),
            PathBuf::from("a.pt"),
            Box::new(MockModel::new("a", Device::Cpu)),
        );

        hook.dispose(&handle).unwrap();

        assert_eq!(runtime.reclaim_count(), 0);
    }

    #[test]
    fn test_accelerator_model_reclaims_pool() {
        let runtime = Arc::new(MockRuntime::new().with_accelerator(Device::Cuda(0)));
        let hook = DeviceReclaimer::new(runtime.clone());
        let handle = ModelHandle::new(
            ModelId(1),
            PathBuf::from("a.pt"),
            Box::new(MockModel::new("a", Device::Cuda(0))),
        );

        hook.dispose(&handle).unwrap();

        assert_eq!(runtime.reclaim_count(), 1);
    }

    #[test]
    fn test_reclaim_failure_is_reported() {
        let runtime = Arc::new(MockRuntime::new().with_failing_reclaim());
        let hook = DeviceReclaimer::new(runtime);
        let handle = ModelHandle::new(
            ModelId(1),
            PathBuf::from("a.pt"),
            Box::new(MockModel::new("a", Device::Cuda(0))),
        );

        assert!(matches!(hook.dispose(&handle), Err(ModelError::Device { .. })));
    }
}
