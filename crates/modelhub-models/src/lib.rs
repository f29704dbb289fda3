//! Model cache for modelhub.
//!
//! This crate turns a model file on disk into a warm, shared in-memory model:
//!
//! - [`ModelLoader`] resolves a locator to a path and asks the runtime to build the model
//! - [`ModelCache`] keeps loaded models keyed by record identity, with
//!   single-flight loading, borrow tracking and idle eviction
//! - [`Evictor`] sweeps the cache on a fixed interval
//! - [`DisposalHook`] frees device memory held by evicted models
//! - [`MockRuntime`] stands in for the inference library in tests

pub mod cache;
pub mod clock;
pub mod dispose;
pub mod evictor;
pub mod handle;
pub mod loader;
pub mod mock;

pub use cache::{
    CacheConfig, CacheConfigError, CacheError, CacheStats, ModelCache, ModelId, ModelLease,
    ModelLocator,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispose::{DeviceReclaimer, DisposalHook};
pub use evictor::{Evictor, EvictorState};
pub use handle::ModelHandle;
pub use loader::{FileSystem, LocalFileSystem, ModelLoader};
pub use mock::{MockModel, MockRuntime};
