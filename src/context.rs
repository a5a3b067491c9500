//! Process-wide worker context
//!
//! Built once at startup and shared by `Arc` with every serving loop. Holds the
//! resolved snapshot and the loaded generator for the life of the process.

use crate::config::WorkerConfig;
use crate::error::ResolveError;
use crate::handler::{GenerationDefaults, JobHandler};
use crate::inference::candle::LoadOptions;
use crate::inference::{CandleGenerator, DeviceProfile, TextGenerator};
use crate::models::{ModelId, download_model_to_cache, resolve_model};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

pub struct WorkerContext {
    pub config: WorkerConfig,
    pub model_id: ModelId,
    pub snapshot_path: PathBuf,
    pub handler: JobHandler,
    generator: Arc<dyn TextGenerator>,
}

impl WorkerContext {
    /// Assemble a context around an already loaded generator
    pub fn new(
        config: WorkerConfig,
        snapshot_path: PathBuf,
        generator: Arc<dyn TextGenerator>,
    ) -> Result<Self> {
        let model_id = ModelId::parse(&config.model_name)?;
        let handler = JobHandler::new(generator.clone(), GenerationDefaults::from(&config));

        Ok(Self {
            config,
            model_id,
            snapshot_path,
            handler,
            generator,
        })
    }

    /// Resolve the snapshot and load the model. Any error here is fatal.
    pub async fn startup(config: WorkerConfig) -> Result<Arc<Self>> {
        let snapshot_path = locate_snapshot(&config).await?;
        tracing::info!(snapshot = ?snapshot_path, "Resolved local model path");

        let device = config.device;
        let options = LoadOptions {
            precision: config.precision,
            return_full_text: config.return_full_text,
        };
        let load_path = snapshot_path.clone();

        let generator = tokio::task::spawn_blocking(move || {
            let profile = DeviceProfile::select(device)?;
            CandleGenerator::load(&load_path, profile, &options)
        })
        .await
        .context("Model loading task failed")?
        .with_context(|| format!("Failed to load model from {:?}", snapshot_path))?;

        Ok(Arc::new(Self::new(
            config,
            snapshot_path,
            Arc::new(generator),
        )?))
    }

    pub fn generator_description(&self) -> String {
        self.generator.describe()
    }
}

/// Find the snapshot directory for the configured model.
///
/// In offline mode a missing cache is fatal. Otherwise the model is downloaded
/// into the cache root and resolved again.
pub async fn locate_snapshot(config: &WorkerConfig) -> Result<PathBuf> {
    let model_id = ModelId::parse(&config.model_name)?;

    match resolve_model(&model_id, &config.cache_root) {
        Ok(path) => Ok(path),
        Err(e) if config.offline => Err(anyhow::Error::new(e).context(format!(
            "Offline mode: {} must already be present under {:?}",
            model_id, config.cache_root
        ))),
        Err(e @ (ResolveError::CacheNotFound { .. } | ResolveError::NoSnapshotsAvailable { .. })) => {
            tracing::warn!(model_id = %model_id, error = %e, "Model not cached, downloading");
            download_model_to_cache(&model_id, &config.cache_root, config.hf_token.clone())
                .await?;
            Ok(resolve_model(&model_id, &config.cache_root)?)
        }
        Err(e) => Err(e.into()),
    }
}
