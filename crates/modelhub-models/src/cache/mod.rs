//! Model caching system.
//!
//! Keeps loaded models in memory keyed by record identity, collapses
//! concurrent loads of the same model into one, and evicts models that have
//! been idle for too long once nothing is using them.

pub mod cache;
pub mod config;
pub mod error;
pub mod lease;
pub mod types;

pub use cache::ModelCache;
pub use config::{CacheConfig, CacheConfigError};
pub use error::CacheError;
pub use lease::ModelLease;
pub use types::{CacheStats, ModelId, ModelLocator};
