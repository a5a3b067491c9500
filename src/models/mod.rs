//! Model cache module
//!
//! Provides functionality for:
//! - Resolving the snapshot directory for a model in a hub cache
//! - Inspecting cached models
//! - Downloading models when offline mode is disabled
//! - Parsing model metadata from config.json

pub mod cache;
pub mod download;
pub mod metadata;
pub mod snapshot;

pub use cache::{CachedModel, list_cached_models};
pub use download::download_model_to_cache;
pub use metadata::{ModelMetadata, parse_model_config};
pub use snapshot::{ModelId, RepoLayout, resolve, resolve_model};
