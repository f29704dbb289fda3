//! Prediction service.
//!
//! Resolves a record to a cached model, runs the prediction on the blocking
//! pool while holding a lease on the model, and shapes the raw runtime output
//! into the response format.

use modelhub_abstraction::{DeviceInfo, ImageInput, ModelRuntime, RawBox, RawPrediction};
use modelhub_models::ModelCache;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ModelsConfig;
use crate::error::{Result, ServeError};
use crate::records::{FileType, RecordStore};

/// Top class of a classification model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    /// Index of the most likely class.
    pub class: Option<usize>,
    /// Probability of that class.
    pub confidence: Option<f32>,
    /// Name of that class. Left out when there is no prediction at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
}

/// One detected object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    /// Corner coordinates `[x1, y1, x2, y2]`.
    #[serde(rename = "box")]
    pub bbox: [f32; 4],
    /// Detection confidence.
    pub confidence: f32,
    /// Class index.
    pub class: usize,
    /// Class name.
    pub name: String,
}

/// Post-processed prediction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PredictionResult {
    /// Output of a classification model.
    Classification(Classification),
    /// Output of a detection model.
    Detections(Vec<Detection>),
}

/// Successful prediction response body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResponse {
    /// Always `"success"`.
    pub status: &'static str,
    /// Task of the model that answered.
    #[serde(rename = "type")]
    pub file_type: FileType,
    /// The prediction.
    pub result: PredictionResult,
}

/// Shape raw runtime output into a response result.
#[must_use]
pub fn process_prediction(raw: RawPrediction) -> PredictionResult {
    match raw {
        RawPrediction::Classification { probs, names } => {
            PredictionResult::Classification(classify(&probs, &names))
        }
        RawPrediction::Detection { boxes, names } => {
            PredictionResult::Detections(boxes.iter().map(|b| detection(b, &names)).collect())
        }
    }
}

fn classify(probs: &[f32], names: &[String]) -> Classification {
    let top = probs
        .iter()
        .copied()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b));
    match top {
        Some((class, confidence)) => Classification {
            class: Some(class),
            confidence: Some(confidence),
            class_name: names.get(class).cloned(),
        },
        None => Classification {
            class: None,
            confidence: None,
            class_name: None,
        },
    }
}

fn detection(raw: &RawBox, names: &[String]) -> Detection {
    Detection {
        bbox: raw.xyxy,
        confidence: raw.confidence,
        class: raw.class,
        name: names.get(raw.class).cloned().unwrap_or_default(),
    }
}

/// Serves predictions from cached models.
pub struct PredictService {
    cache: Arc<ModelCache>,
    records: Arc<dyn RecordStore>,
    runtime: Arc<dyn ModelRuntime>,
    models: ModelsConfig,
    max_age: Duration,
}

impl PredictService {
    /// Create a service over a shared cache.
    ///
    /// The ad-hoc sweep after each prediction uses the cache's configured max age.
    #[must_use]
    pub fn new(
        cache: Arc<ModelCache>,
        records: Arc<dyn RecordStore>,
        runtime: Arc<dyn ModelRuntime>,
        models: ModelsConfig,
    ) -> Self {
        let max_age = cache.config().max_age();
        Self {
            cache,
            records,
            runtime,
            models,
            max_age,
        }
    }

    /// Whether an upload with this file extension is accepted.
    #[must_use]
    pub fn allowed_file(&self, image: &ImageInput) -> bool {
        image
            .extension()
            .is_some_and(|ext| self.models.allowed_extensions.contains(&ext))
    }

    /// Run the model of record `id` on `image`.
    ///
    /// After predicting, device memory is reclaimed if the model lives on an
    /// accelerator, and a throttled sweep of the cache is requested.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for an empty or disallowed upload
    /// - `RecordNotFound` for an unknown id
    /// - `Cache` when the model file is missing or cannot be loaded
    /// - `Prediction` when the runtime fails
    pub async fn predict(&self, id: i64, image: ImageInput) -> Result<PredictionResponse> {
        if image.bytes.is_empty() {
            return Err(ServeError::InvalidInput("No image provided".to_string()));
        }
        if !self.allowed_file(&image) {
            return Err(ServeError::InvalidInput(
                "No selected file or invalid file type".to_string(),
            ));
        }

        let record = self
            .records
            .find(id)
            .await?
            .ok_or(ServeError::RecordNotFound(id))?;
        let locator = record.locator(&self.models);
        let lease = self.cache.get_or_load(record.identity(), &locator).await?;
        let device = lease.device();
        debug!(id, %device, filename = %record.filename, "Running prediction");

        let runtime = Arc::clone(&self.runtime);
        let raw = tokio::task::spawn_blocking(move || {
            let raw = lease.predict(&image);
            drop(lease);
            if device.is_accelerator() {
                if let Err(e) = runtime.reclaim_device_memory(device) {
                    warn!(id, %device, error = %e, "Device memory reclamation failed");
                }
            }
            raw
        })
        .await
        .map_err(|e| ServeError::Other(anyhow::anyhow!("prediction task failed: {e}")))??;

        let result = process_prediction(raw);
        let evicted = self.cache.sweep_older_than(self.max_age).await;
        info!(id, file_type = record.file_type.as_str(), evicted, "Prediction served");

        Ok(PredictionResponse {
            status: "success",
            file_type: record.file_type,
            result,
        })
    }

    /// Accelerator availability as seen by the runtime.
    #[must_use]
    pub fn device_report(&self) -> DeviceInfo {
        self.runtime.device_info()
    }

    /// The shared cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }
}

impl std::fmt::Debug for PredictService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictService")
            .field("cache", &self.cache)
            .field("models", &self.models)
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names() -> Vec<String> {
        vec!["cat".to_string(), "dog".to_string()]
    }

    #[test]
    fn test_classification_picks_argmax() {
        let result = process_prediction(RawPrediction::Classification {
            probs: vec![0.2, 0.8],
            names: names(),
        });
        assert_eq!(
            result,
            PredictionResult::Classification(Classification {
                class: Some(1),
                confidence: Some(0.8),
                class_name: Some("dog".to_string()),
            })
        );
    }

    #[test]
    fn test_classification_without_probs() {
        let result = process_prediction(RawPrediction::Classification {
            probs: vec![],
            names: names(),
        });
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value, json!({"class": null, "confidence": null}));
    }

    #[test]
    fn test_detection_serializes_box_field() {
        let result = process_prediction(RawPrediction::Detection {
            boxes: vec![RawBox {
                xyxy: [1.0, 2.0, 3.0, 4.0],
                confidence: 0.5,
                class: 0,
            }],
            names: names(),
        });
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!([{"box": [1.0, 2.0, 3.0, 4.0], "confidence": 0.5, "class": 0, "name": "cat"}])
        );
    }

    #[test]
    fn test_detection_unknown_class_name() {
        let result = process_prediction(RawPrediction::Detection {
            boxes: vec![RawBox {
                xyxy: [0.0; 4],
                confidence: 0.9,
                class: 7,
            }],
            names: names(),
        });
        let PredictionResult::Detections(detections) = result else {
            panic!("expected detections");
        };
        assert_eq!(detections[0].name, "");
    }
}
