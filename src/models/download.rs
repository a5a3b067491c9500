//! Model download using hf-hub
//!
//! Only reachable when offline mode is disabled. Files land in the same hub
//! cache layout the resolver reads, so a later offline start finds them.

use super::snapshot::ModelId;
use crate::error::LoadError;
use hf_hub::api::tokio::{ApiBuilder, ApiRepo};
use std::path::{Path, PathBuf};

/// Files every causal LM snapshot needs
const ESSENTIAL_FILES: [&str; 2] = ["config.json", "tokenizer.json"];

/// Files fetched when present upstream
const OPTIONAL_FILES: [&str; 3] = [
    "generation_config.json",
    "tokenizer_config.json",
    "special_tokens_map.json",
];

const WEIGHT_INDEX: &str = "model.safetensors.index.json";
const SINGLE_WEIGHTS: &str = "model.safetensors";

/// Download a model into `cache_root`
///
/// # Returns
/// * `Ok(PathBuf)` - Path to the downloaded model's snapshot directory
/// * `Err(LoadError::Download)` - If the client could not be built or a required file failed
pub async fn download_model_to_cache(
    model_id: &ModelId,
    cache_root: &Path,
    token: Option<String>,
) -> Result<PathBuf, LoadError> {
    tracing::info!(model_id = %model_id, cache_root = ?cache_root, "Starting model download via hf-hub");

    let api = ApiBuilder::new()
        .with_cache_dir(cache_root.to_path_buf())
        .with_token(token)
        .build()
        .map_err(|e| LoadError::Download(format!("Failed to create HF API client: {}", e)))?;

    let repo = api.model(model_id.to_string());

    let mut config_path: Option<PathBuf> = None;
    for file in ESSENTIAL_FILES {
        tracing::debug!(model_id = %model_id, file = %file, "Downloading file");
        let path = repo
            .get(file)
            .await
            .map_err(|e| LoadError::Download(format!("Failed to download {}: {}", file, e)))?;

        if file == "config.json" {
            config_path = Some(path);
        }
    }

    // Sharded checkpoints first, then a single file
    match repo.get(WEIGHT_INDEX).await {
        Ok(index_path) => download_sharded_weights(&repo, &index_path, model_id).await?,
        Err(_) => {
            repo.get(SINGLE_WEIGHTS).await.map_err(|e| {
                LoadError::Download(format!("Failed to download {}: {}", SINGLE_WEIGHTS, e))
            })?;
        }
    }

    for file in OPTIONAL_FILES {
        if repo.get(file).await.is_ok() {
            tracing::debug!(model_id = %model_id, file = %file, "Downloaded optional file");
        }
    }

    config_path
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .ok_or_else(|| {
            LoadError::Download(format!(
                "Model downloaded but snapshot path not found for {}",
                model_id
            ))
        })
}

/// Download the shard files referenced by a safetensors index
async fn download_sharded_weights(
    repo: &ApiRepo,
    index_path: &Path,
    model_id: &ModelId,
) -> Result<(), LoadError> {
    let shards = super::metadata::shard_files(index_path)?;

    tracing::info!(
        model_id = %model_id,
        shard_count = shards.len(),
        "Downloading sharded weights"
    );

    for shard in shards {
        tracing::debug!(model_id = %model_id, shard = %shard, "Downloading shard");
        repo.get(&shard)
            .await
            .map_err(|e| LoadError::Download(format!("Failed to download shard {}: {}", shard, e)))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_api_builder_with_cache_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let api = ApiBuilder::new()
            .with_cache_dir(temp_dir.path().to_path_buf())
            .build();
        assert!(api.is_ok());
    }

    #[tokio::test]
    #[ignore = "requires network access and downloads ~60MB"]
    async fn test_download_small_model() {
        let temp_dir = tempfile::tempdir().unwrap();
        let id = ModelId::parse("HuggingFaceTB/SmolLM2-135M").unwrap();
        let path = download_model_to_cache(&id, temp_dir.path(), None)
            .await
            .expect("download failed");
        assert!(path.join("config.json").exists());
        assert!(path.join("tokenizer.json").exists());

        let resolved = crate::models::snapshot::resolve_model(&id, temp_dir.path()).unwrap();
        assert_eq!(resolved, path);
    }
}
