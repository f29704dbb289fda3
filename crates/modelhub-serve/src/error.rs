//! Error types for the serving layer.

use http::StatusCode;
use modelhub_abstraction::ModelError;
use modelhub_models::{CacheConfigError, CacheError};
use thiserror::Error;

/// Result type alias for serving operations.
pub type Result<T> = std::result::Result<T, ServeError>;

/// Errors surfaced to the request-handling layer.
#[derive(Debug, Error)]
pub enum ServeError {
    /// No model record exists for the requested id.
    #[error("model record {0} not found")]
    RecordNotFound(i64),

    /// The request itself is unusable (missing or disallowed image).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The cache could not produce a model.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The model was loaded but prediction failed.
    #[error("prediction failed: {0}")]
    Prediction(#[from] ModelError),

    /// Configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Other errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<CacheConfigError> for ServeError {
    fn from(err: CacheConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl ServeError {
    /// The HTTP status a response for this error should carry.
    ///
    /// A missing record or model file is a 404; a model that exists but cannot
    /// be loaded or run is a 500.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RecordNotFound(_) => StatusCode::NOT_FOUND,
            Self::Cache(err) if err.is_not_found() => StatusCode::NOT_FOUND,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Cache(_)
            | Self::Prediction(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::Toml(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
