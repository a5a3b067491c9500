//! Hub cache inspection
//!
//! Lists and sizes the models present under a cache root. Snapshot selection
//! itself lives in [`super::snapshot`].

use super::snapshot::{ModelId, RepoLayout};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Summary of one cached model
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CachedModel {
    pub model_id: String,
    pub snapshots: Vec<String>,
    pub size_bytes: u64,
}

/// Convert cache directory name back to model ID
///
/// e.g., "models--BAAI--bge-small-en-v1.5" -> "BAAI/bge-small-en-v1.5"
fn cache_name_to_model_id(cache_name: &str) -> Option<String> {
    cache_name
        .strip_prefix("models--")
        .map(|s| s.replacen("--", "/", 1))
}

/// Total size of a cached model in bytes
pub fn get_cache_size(cache_root: &Path, model_id: &ModelId) -> Option<u64> {
    let model_dir = cache_root.join(model_id.cache_dir_name());

    if !model_dir.exists() {
        return None;
    }

    Some(dir_size(&model_dir))
}

/// Recursively calculate directory size
///
/// Snapshot files are usually symlinks into `blobs/`, so only regular files are
/// counted to avoid double counting.
fn dir_size(path: &PathBuf) -> u64 {
    let mut size = 0;

    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(metadata) = std::fs::symlink_metadata(&path) else {
                continue;
            };
            if metadata.is_dir() {
                size += dir_size(&path);
            } else if metadata.is_file() {
                size += metadata.len();
            }
        }
    }

    size
}

/// List all models found under `cache_root`, sorted by id
pub fn list_cached_models(cache_root: &Path) -> Vec<CachedModel> {
    let Ok(entries) = std::fs::read_dir(cache_root) else {
        return Vec::new();
    };

    let mut models = Vec::new();

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();

        let Some(id) = cache_name_to_model_id(&name).and_then(|s| ModelId::parse(&s).ok())
        else {
            continue;
        };

        let snapshots: Vec<String> = RepoLayout::new(cache_root, &id)
            .snapshot_names()
            .unwrap_or_default()
            .iter()
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        if snapshots.is_empty() {
            continue;
        }

        models.push(CachedModel {
            size_bytes: get_cache_size(cache_root, &id).unwrap_or(0),
            model_id: id.to_string(),
            snapshots,
        });
    }

    models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
    models
}
