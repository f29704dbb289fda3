//! Startup wiring: one shared cache, its evictor, and the prediction service.

use modelhub_abstraction::ModelRuntime;
use modelhub_models::{Evictor, EvictorState, ModelCache, ModelLoader};
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::predict::PredictService;
use crate::records::RecordStore;

/// The running model-serving core.
#[derive(Debug)]
pub struct ModelService {
    cache: Arc<ModelCache>,
    predict: PredictService,
    evictor: Option<Evictor>,
}

impl ModelService {
    /// Build the cache and start the evictor if enabled.
    ///
    /// Must be called from within a tokio runtime when the evictor is enabled.
    ///
    /// # Errors
    ///
    /// Returns `ServeError::Config` if the configuration is invalid.
    pub fn start(
        config: &Config,
        runtime: Arc<dyn ModelRuntime>,
        records: Arc<dyn RecordStore>,
    ) -> Result<Self> {
        config.validate()?;

        let loader = ModelLoader::new(Arc::clone(&runtime)).with_root(config.models.root.clone());
        let cache = Arc::new(ModelCache::new(config.cache.clone(), loader)?);

        let evictor = config.cache.evictor_enabled.then(|| {
            Evictor::spawn(
                Arc::clone(&cache),
                config.cache.sweep_interval(),
                config.cache.max_age(),
            )
        });

        let predict =
            PredictService::new(Arc::clone(&cache), records, runtime, config.models.clone());

        info!(
            root = %config.models.root.display(),
            evictor = evictor.is_some(),
            max_age_secs = config.cache.max_age_secs,
            sweep_interval_secs = config.cache.sweep_interval_secs,
            "Model service started"
        );
        Ok(Self {
            cache,
            predict,
            evictor,
        })
    }

    /// The shared model cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    /// The prediction service.
    #[must_use]
    pub fn predict_service(&self) -> &PredictService {
        &self.predict
    }

    /// State of the evictor, or `None` when it is disabled.
    #[must_use]
    pub fn evictor_state(&self) -> Option<EvictorState> {
        self.evictor.as_ref().map(Evictor::state)
    }

    /// Stop the evictor. Cached models stay loaded until the process exits.
    pub async fn shutdown(self) {
        if let Some(evictor) = self.evictor {
            evictor.shutdown().await;
        }
        info!("Model service stopped");
    }
}
