//! Loaded model handles.

use modelhub_abstraction::{Device, ImageInput, InferenceModel, ModelError, RawPrediction};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::cache::ModelId;

/// A loaded, ready-to-use model.
///
/// Owned by the cache entry once inserted. Callers reach it through a
/// [`crate::ModelLease`], which keeps the in-use count positive so a sweep
/// never disposes a handle mid-prediction.
pub struct ModelHandle {
    identity: ModelId,
    path: PathBuf,
    model: Box<dyn InferenceModel>,
    in_use: AtomicUsize,
    disposed: AtomicBool,
}

impl ModelHandle {
    /// Wrap a runtime model, tagging it with the record it was loaded for.
    #[must_use]
    pub fn new(identity: ModelId, path: PathBuf, model: Box<dyn InferenceModel>) -> Self {
        Self {
            identity,
            path,
            model,
            in_use: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
        }
    }

    /// The record this model was loaded for.
    #[must_use]
    pub fn identity(&self) -> ModelId {
        self.identity
    }

    /// The file the model was loaded from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The device the model currently lives on.
    #[must_use]
    pub fn device(&self) -> Device {
        self.model.device()
    }

    /// The underlying runtime model.
    #[must_use]
    pub fn model(&self) -> &dyn InferenceModel {
        self.model.as_ref()
    }

    /// Run a prediction.
    ///
    /// # Errors
    /// Returns `ModelError::Other` if the handle has already been disposed,
    /// or whatever the runtime reports.
    pub fn predict(&self, input: &ImageInput) -> Result<RawPrediction, ModelError> {
        if self.is_disposed() {
            return Err(ModelError::Other(format!("model {} has been disposed", self.identity)));
        }
        self.model.predict(input)
    }

    /// Number of outstanding borrows.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    /// Whether the disposal routine has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn acquire(&self) {
        self.in_use.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn release(&self) {
        self.in_use.fetch_sub(1, Ordering::SeqCst);
    }

    /// Flip the disposed flag. Returns `true` only for the first caller.
    pub(crate) fn mark_disposed(&self) -> bool {
        !self.disposed.swap(true, Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("identity", &self.identity)
            .field("path", &self.path)
            .field("device", &self.device())
            .field("in_use", &self.in_use())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
