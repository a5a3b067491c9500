//! Model metadata parsing
//!
//! Reads the pieces of `config.json`, `generation_config.json` and the
//! safetensors index that the loader needs: architecture, checkpoint dtype,
//! stop tokens and weight files.

use crate::error::LoadError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Metadata extracted from a snapshot
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelMetadata {
    /// Architecture type (e.g., "phi3", "llama", "mistral")
    pub model_type: String,

    /// Checkpoint dtype as written by the exporter (e.g., "bfloat16")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub torch_dtype: Option<String>,

    /// Stop tokens, merged from config.json and generation_config.json
    pub eos_token_ids: Vec<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_position_embeddings: Option<usize>,
}

/// `eos_token_id` is either a single id or a list
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenIds {
    One(u32),
    Many(Vec<u32>),
}

impl TokenIds {
    fn into_vec(self) -> Vec<u32> {
        match self {
            TokenIds::One(id) => vec![id],
            TokenIds::Many(ids) => ids,
        }
    }
}

/// Raw config.json structure (partial)
#[derive(Debug, Deserialize)]
struct RawConfig {
    model_type: Option<String>,
    torch_dtype: Option<String>,
    eos_token_id: Option<TokenIds>,
    max_position_embeddings: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawGenerationConfig {
    eos_token_id: Option<TokenIds>,
}

#[derive(Debug, Deserialize)]
struct RawWeightIndex {
    weight_map: std::collections::HashMap<String, String>,
}

fn read_file(path: &Path) -> Result<String, LoadError> {
    std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn invalid(path: &Path, err: impl std::fmt::Display) -> LoadError {
    LoadError::InvalidConfig {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

/// Parse model metadata from a snapshot directory
pub fn parse_model_config(snapshot_dir: &Path) -> Result<ModelMetadata, LoadError> {
    let config_path = snapshot_dir.join("config.json");
    let raw: RawConfig =
        serde_json::from_str(&read_file(&config_path)?).map_err(|e| invalid(&config_path, e))?;

    let model_type = raw
        .model_type
        .ok_or_else(|| invalid(&config_path, "missing model_type"))?;

    let mut eos: BTreeSet<u32> = raw
        .eos_token_id
        .map(TokenIds::into_vec)
        .unwrap_or_default()
        .into_iter()
        .collect();

    // generation_config.json often lists extra stop tokens (e.g. <|end|>)
    let generation_path = snapshot_dir.join("generation_config.json");
    if generation_path.is_file() {
        match serde_json::from_str::<RawGenerationConfig>(&read_file(&generation_path)?) {
            Ok(generation) => {
                eos.extend(
                    generation
                        .eos_token_id
                        .map(TokenIds::into_vec)
                        .unwrap_or_default(),
                );
            }
            Err(e) => {
                tracing::warn!(path = ?generation_path, error = %e, "Ignoring unparsable generation_config.json");
            }
        }
    }

    Ok(ModelMetadata {
        model_type,
        torch_dtype: raw.torch_dtype,
        eos_token_ids: eos.into_iter().collect(),
        max_position_embeddings: raw.max_position_embeddings,
    })
}

/// Unique shard file names referenced by a safetensors index, sorted
pub fn shard_files(index_path: &Path) -> Result<Vec<String>, LoadError> {
    let index: RawWeightIndex =
        serde_json::from_str(&read_file(index_path)?).map_err(|e| invalid(index_path, e))?;

    let shards: BTreeSet<String> = index.weight_map.into_values().collect();
    Ok(shards.into_iter().collect())
}

/// Weight files to memory-map for a snapshot
pub fn weight_files(snapshot_dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let index_path = snapshot_dir.join("model.safetensors.index.json");
    if index_path.is_file() {
        return Ok(shard_files(&index_path)?
            .into_iter()
            .map(|shard| snapshot_dir.join(shard))
            .collect());
    }

    let single = snapshot_dir.join("model.safetensors");
    if single.exists() {
        return Ok(vec![single]);
    }

    Err(LoadError::MissingWeights(snapshot_dir.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_phi3_style_config() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            temp_dir.path().join("config.json"),
            r#"{
                "model_type": "phi3",
                "torch_dtype": "bfloat16",
                "bos_token_id": 1,
                "eos_token_id": 32000,
                "max_position_embeddings": 4096
            }"#,
        )
        .unwrap();
        std::fs::write(
            temp_dir.path().join("generation_config.json"),
            r#"{"eos_token_id": [32000, 32001, 32007]}"#,
        )
        .unwrap();

        let metadata = parse_model_config(temp_dir.path()).unwrap();
        assert_eq!(metadata.model_type, "phi3");
        assert_eq!(metadata.torch_dtype.as_deref(), Some("bfloat16"));
        assert_eq!(metadata.eos_token_ids, vec![32000, 32001, 32007]);
        assert_eq!(metadata.max_position_embeddings, Some(4096));
    }

    #[test]
    fn test_parse_missing_config() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            parse_model_config(temp_dir.path()),
            Err(LoadError::Io { .. })
        ));
    }

    #[test]
    fn test_parse_missing_model_type() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("config.json"), r#"{"vocab_size": 10}"#).unwrap();
        assert!(matches!(
            parse_model_config(temp_dir.path()),
            Err(LoadError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_weight_files_sharded() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            temp_dir.path().join("model.safetensors.index.json"),
            r#"{"metadata": {}, "weight_map": {
                "a": "model-00002-of-00002.safetensors",
                "b": "model-00001-of-00002.safetensors",
                "c": "model-00001-of-00002.safetensors"
            }}"#,
        )
        .unwrap();

        let files = weight_files(temp_dir.path()).unwrap();
        assert_eq!(
            files,
            vec![
                temp_dir.path().join("model-00001-of-00002.safetensors"),
                temp_dir.path().join("model-00002-of-00002.safetensors"),
            ]
        );
    }

    #[test]
    fn test_weight_files_missing() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            weight_files(temp_dir.path()),
            Err(LoadError::MissingWeights(_))
        ));
    }
}
