//! Inference runtime abstraction layer for modelhub.
//!
//! This module defines the contract between the model cache and the external
//! inference library: how a model is constructed from a file, how it is moved
//! onto an accelerator, how it predicts, and how its device memory is released.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Represents an error raised by the inference runtime.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelError {
    /// The runtime could not construct a model from the file (corruption,
    /// format mismatch, device initialization failure).
    #[error("Model Load Error: {0}")]
    LoadFailed(String),

    /// The model failed while running a prediction.
    #[error("Prediction Error: {0}")]
    Prediction(String),

    /// A device operation (placement, release, reclamation) failed.
    #[error("Device Error on {device}: {message}")]
    Device {
        /// The device the operation targeted.
        device: Device,
        /// Runtime-provided error message.
        message: String,
    },

    /// Other unexpected errors.
    #[error("Other Model Error: {0}")]
    Other(String),
}

/// Compute device a model can live on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "index")]
pub enum Device {
    /// Default host compute path.
    Cpu,
    /// CUDA accelerator with the given ordinal.
    Cuda(usize),
}

impl Device {
    /// Whether this device is an accelerator with its own memory pool.
    #[must_use]
    pub const fn is_accelerator(self) -> bool {
        matches!(self, Self::Cuda(_))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(index) => write!(f, "cuda:{index}"),
        }
    }
}

/// Accelerator availability as reported by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Whether a CUDA device is usable.
    pub cuda_available: bool,
    /// Number of visible accelerators.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_count: Option<usize>,
    /// Name of the first accelerator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_name: Option<String>,
}

/// An image submitted for prediction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    /// Original upload filename, used for extension checks.
    pub filename: String,
    /// Encoded image bytes.
    pub bytes: Vec<u8>,
}

impl ImageInput {
    /// Creates a new `ImageInput`.
    #[must_use]
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }

    /// Lowercased extension of the upload filename, if any.
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        self.filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
    }
}

/// One raw detection box as produced by a detection model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBox {
    /// Corner coordinates `[x1, y1, x2, y2]`.
    pub xyxy: [f32; 4],
    /// Detection confidence.
    pub confidence: f32,
    /// Class index into the model's names.
    pub class: usize,
}

/// Raw runtime output, before post-processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "task")]
pub enum RawPrediction {
    /// Per-class probabilities from a classification model.
    Classification {
        /// Probability per class index.
        probs: Vec<f32>,
        /// Class names indexed by class id.
        names: Vec<String>,
    },
    /// Boxes from a detection model.
    Detection {
        /// Detected boxes.
        boxes: Vec<RawBox>,
        /// Class names indexed by class id.
        names: Vec<String>,
    },
}

/// A model constructed by the runtime.
///
/// Implementations must be `Send + Sync`; the cache shares one instance across
/// request tasks, although the runtime session is expected to serve one
/// prediction at a time.
pub trait InferenceModel: Send + Sync {
    /// Runs a prediction on the given image.
    ///
    /// # Errors
    /// Returns a `ModelError` if inference fails.
    fn predict(&self, input: &ImageInput) -> Result<RawPrediction, ModelError>;

    /// Moves the model onto the given device.
    ///
    /// # Errors
    /// Returns a `ModelError::Device` if the transfer fails.
    fn place_on_device(&self, device: Device) -> Result<(), ModelError>;

    /// The device the model currently lives on.
    fn device(&self) -> Device;

    /// Frees resources held by the model. Called once, on eviction.
    ///
    /// # Errors
    /// Returns a `ModelError` if the runtime fails to free the resources.
    fn release(&self) -> Result<(), ModelError>;
}

/// The inference library: constructs models and manages device memory.
pub trait ModelRuntime: Send + Sync {
    /// Constructs a model from the file at `path`.
    ///
    /// # Errors
    /// Returns `ModelError::LoadFailed` if the file cannot be parsed or initialized.
    fn construct_from_path(&self, path: &Path) -> Result<Box<dyn InferenceModel>, ModelError>;

    /// The accelerator new models should be placed on, if one is available.
    fn accelerator(&self) -> Option<Device>;

    /// Requests a pool-wide reclamation pass on the device's memory pool.
    ///
    /// # Errors
    /// Returns `ModelError::Device` if the runtime rejects the request.
    fn reclaim_device_memory(&self, device: Device) -> Result<(), ModelError>;

    /// Describes the accelerators visible to the runtime.
    fn device_info(&self) -> DeviceInfo;
}
