//! In-process runtime for tests and development.
//!
//! `MockRuntime` never touches a real inference library. It counts how often
//! it is asked to construct models and reclaim memory, and can be configured
//! to be slow, to fail for specific files, or to report an accelerator.

use modelhub_abstraction::{
    Device, DeviceInfo, ImageInput, InferenceModel, ModelError, ModelRuntime, RawPrediction,
};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

const CPU: i64 = -1;

/// A model that returns a canned prediction.
#[derive(Debug)]
pub struct MockModel {
    id: String,
    device: AtomicI64,
    released: AtomicBool,
    releases: Option<Arc<AtomicUsize>>,
    fail_placement: bool,
    prediction: RawPrediction,
}

impl MockModel {
    /// Creates a `MockModel` living on `device`.
    #[must_use]
    pub fn new(id: impl Into<String>, device: Device) -> Self {
        Self {
            id: id.into(),
            device: AtomicI64::new(encode(device)),
            released: AtomicBool::new(false),
            releases: None,
            fail_placement: false,
            prediction: default_prediction(),
        }
    }

    /// The id the model was created with.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether `release` has been called.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl InferenceModel for MockModel {
    fn predict(&self, input: &ImageInput) -> Result<RawPrediction, ModelError> {
        if input.bytes.is_empty() {
            return Err(ModelError::Prediction("empty image".to_string()));
        }
        debug!(model_id = %self.id, bytes = input.bytes.len(), "MockModel predicting");
        Ok(self.prediction.clone())
    }

    fn place_on_device(&self, device: Device) -> Result<(), ModelError> {
        if self.fail_placement {
            return Err(ModelError::Device {
                device,
                message: "placement refused".to_string(),
            });
        }
        self.device.store(encode(device), Ordering::SeqCst);
        Ok(())
    }

    fn device(&self) -> Device {
        decode(self.device.load(Ordering::SeqCst))
    }

    fn release(&self) -> Result<(), ModelError> {
        self.released.store(true, Ordering::SeqCst);
        if let Some(releases) = &self.releases {
            releases.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// A runtime producing [`MockModel`]s.
#[derive(Debug)]
pub struct MockRuntime {
    constructs: AtomicUsize,
    reclaims: AtomicUsize,
    releases: Arc<AtomicUsize>,
    load_delay: Duration,
    failing: HashSet<String>,
    accelerator: Option<Device>,
    fail_placement: bool,
    fail_reclaim: bool,
    prediction: RawPrediction,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    /// A CPU-only runtime that loads instantly.
    #[must_use]
    pub fn new() -> Self {
        Self {
            constructs: AtomicUsize::new(0),
            reclaims: AtomicUsize::new(0),
            releases: Arc::new(AtomicUsize::new(0)),
            load_delay: Duration::ZERO,
            failing: HashSet::new(),
            accelerator: None,
            fail_placement: false,
            fail_reclaim: false,
            prediction: default_prediction(),
        }
    }

    /// Block for `delay` inside every `construct_from_path` call.
    #[must_use]
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Fail construction for files with this name.
    #[must_use]
    pub fn with_failing_file(mut self, filename: impl Into<String>) -> Self {
        self.failing.insert(filename.into());
        self
    }

    /// Report `device` as the available accelerator.
    #[must_use]
    pub fn with_accelerator(mut self, device: Device) -> Self {
        self.accelerator = Some(device);
        self
    }

    /// Make device placement fail on every model.
    #[must_use]
    pub fn with_failing_placement(mut self) -> Self {
        self.fail_placement = true;
        self
    }

    /// Make memory reclamation fail.
    #[must_use]
    pub fn with_failing_reclaim(mut self) -> Self {
        self.fail_reclaim = true;
        self
    }

    /// Canned output returned by every model.
    #[must_use]
    pub fn with_prediction(mut self, prediction: RawPrediction) -> Self {
        self.prediction = prediction;
        self
    }

    /// How many times `construct_from_path` ran.
    #[must_use]
    pub fn construct_count(&self) -> usize {
        self.constructs.load(Ordering::SeqCst)
    }

    /// How many models built by this runtime were released.
    #[must_use]
    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// How many reclamation passes were requested.
    #[must_use]
    pub fn reclaim_count(&self) -> usize {
        self.reclaims.load(Ordering::SeqCst)
    }
}

impl ModelRuntime for MockRuntime {
    fn construct_from_path(&self, path: &Path) -> Result<Box<dyn InferenceModel>, ModelError> {
        self.constructs.fetch_add(1, Ordering::SeqCst);
        if !self.load_delay.is_zero() {
            std::thread::sleep(self.load_delay);
        }

        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        if self.failing.contains(filename) {
            return Err(ModelError::LoadFailed(format!("cannot parse {}", path.display())));
        }

        Ok(Box::new(MockModel {
            id: path.display().to_string(),
            device: AtomicI64::new(CPU),
            released: AtomicBool::new(false),
            releases: Some(Arc::clone(&self.releases)),
            fail_placement: self.fail_placement,
            prediction: self.prediction.clone(),
        }))
    }

    fn accelerator(&self) -> Option<Device> {
        self.accelerator
    }

    fn reclaim_device_memory(&self, device: Device) -> Result<(), ModelError> {
        self.reclaims.fetch_add(1, Ordering::SeqCst);
        if self.fail_reclaim {
            return Err(ModelError::Device {
                device,
                message: "reclaim failed".to_string(),
            });
        }
        Ok(())
    }

    fn device_info(&self) -> DeviceInfo {
        match self.accelerator {
            Some(_) => DeviceInfo {
                cuda_available: true,
                gpu_count: Some(1),
                gpu_name: Some("Mock GPU".to_string()),
            },
            None => DeviceInfo::default(),
        }
    }
}

fn encode(device: Device) -> i64 {
    match device {
        Device::Cpu => CPU,
        Device::Cuda(index) => i64::try_from(index).unwrap_or(i64::MAX),
    }
}

fn decode(raw: i64) -> Device {
    usize::try_from(raw).map_or(Device::Cpu, Device::Cuda)
}

fn default_prediction() -> RawPrediction {
    RawPrediction::Classification {
        probs: vec![0.1, 0.7, 0.2],
        names: vec!["cat".to_string(), "dog".to_string(), "bird".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_runtime_counts_constructs() {
        let runtime = MockRuntime::new();
        let model = runtime.construct_from_path(Path::new("models/a.pt")).unwrap();
        assert_eq!(runtime.construct_count(), 1);
        assert_eq!(model.device(), Device::Cpu);
    }

    #[test]
    fn test_mock_runtime_failing_file() {
        let runtime = MockRuntime::new().with_failing_file("bad.pt");
        let result = runtime.construct_from_path(Path::new("models/bad.pt"));
        assert!(matches!(result, Err(ModelError::LoadFailed(_))));
    }

    #[test]
    fn test_mock_model_placement() {
        let model = MockModel::new("m", Device::Cpu);
        model.place_on_device(Device::Cuda(0)).unwrap();
        assert_eq!(model.device(), Device::Cuda(0));
    }

    #[test]
    fn test_mock_runtime_counts_releases() {
        let runtime = MockRuntime::new();
        let model = runtime.construct_from_path(Path::new("models/a.pt")).unwrap();
        assert_eq!(runtime.release_count(), 0);

        model.release().unwrap();
        assert_eq!(runtime.release_count(), 1);
    }
}
