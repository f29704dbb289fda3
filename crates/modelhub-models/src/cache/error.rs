//! Errors surfaced by `get_or_load`.

use modelhub_abstraction::ModelError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use super::types::ModelId;

/// Typed failure of a cache lookup.
///
/// `Clone` so one failed in-flight load can be handed to every caller that
/// was waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// The locator does not resolve to an existing file.
    #[error("model file for {identity} not found at {}", path.display())]
    NotFound {
        /// The record that was requested.
        identity: ModelId,
        /// The path that was checked.
        path: PathBuf,
    },

    /// The file exists but the runtime could not construct a model from it.
    #[error("failed to load model {identity}: {source}")]
    LoadFailed {
        /// The record that was requested.
        identity: ModelId,
        /// The runtime's error.
        #[source]
        source: ModelError,
    },

    /// Loading took longer than the configured timeout.
    #[error("loading model {identity} timed out after {timeout:?}")]
    LoadTimeout {
        /// The record that was requested.
        identity: ModelId,
        /// The timeout that elapsed.
        timeout: Duration,
    },
}

impl CacheError {
    /// The record the failed lookup was for.
    #[must_use]
    pub fn identity(&self) -> ModelId {
        match self {
            Self::NotFound { identity, .. }
            | Self::LoadFailed { identity, .. }
            | Self::LoadTimeout { identity, .. } => *identity,
        }
    }

    /// Whether this is a definitive miss rather than an unusable model.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether a caller may reasonably retry. Only timeouts qualify.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LoadTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let not_found = CacheError::NotFound {
            identity: ModelId(1),
            path: PathBuf::from("x.pt"),
        };
        let failed = CacheError::LoadFailed {
            identity: ModelId(2),
            source: ModelError::LoadFailed("bad header".to_string()),
        };
        let timeout = CacheError::LoadTimeout {
            identity: ModelId(3),
            timeout: Duration::from_secs(1),
        };

        assert!(not_found.is_not_found());
        assert!(!failed.is_not_found());
        assert!(!failed.is_retryable());
        assert!(timeout.is_retryable());
        assert_eq!(timeout.identity(), ModelId(3));
    }

    #[test]
    fn test_error_display() {
        let err = CacheError::NotFound {
            identity: ModelId(7),
            path: PathBuf::from("models/cls/a.pt"),
        };
        assert_eq!(err.to_string(), "model file for 7 not found at models/cls/a.pt");
    }
}
