//! Model serving for modelhub.
//!
//! The thin layer between request handling and the model cache: it loads
//! configuration, sets up tracing, looks up model records, and turns a
//! record id plus an image into a prediction response.

pub mod config;
pub mod error;
pub mod predict;
pub mod records;
pub mod service;
pub mod telemetry;

pub use config::{Config, LoggingConfig, ModelsConfig};
pub use error::{Result, ServeError};
pub use predict::{Classification, Detection, PredictService, PredictionResponse, PredictionResult};
pub use records::{FileType, InMemoryRecordStore, ModelRecord, RecordStore};
pub use service::ModelService;
pub use telemetry::init_tracing;
