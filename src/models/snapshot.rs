//! Snapshot path resolution for hub-style caches
//!
//! Given a model id and a cache root, locates the snapshot directory that holds
//! the model's weights and tokenizer:
//! ```text
//! {cache_root}/
//! └── models--{org}--{name}/
//!     ├── refs/
//!     │   └── main            (optional, contains a snapshot hash)
//!     └── snapshots/
//!         └── {hash}/
//!             ├── config.json
//!             ├── model.safetensors
//!             └── tokenizer.json
//! ```
//!
//! `refs/main` is authoritative when it names an existing snapshot. Otherwise the
//! lexicographically first snapshot directory is used. That tie-break says nothing
//! about which revision is newest, so the fallback is best effort only.

use crate::error::ResolveError;
use std::ffi::OsString;
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// A hub model identifier of the form `org/name`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelId {
    org: String,
    name: String,
}

impl ModelId {
    /// Parse `org/name`. Exactly one separator with non-empty parts on both sides.
    pub fn parse(model_id: &str) -> Result<Self, ResolveError> {
        let invalid = || ResolveError::InvalidIdentifier {
            model_id: model_id.to_string(),
        };

        let (org, name) = model_id.split_once('/').ok_or_else(invalid)?;
        if org.is_empty() || name.is_empty() || name.contains('/') {
            return Err(invalid());
        }

        Ok(Self {
            org: org.to_string(),
            name: name.to_string(),
        })
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory name used by the hub cache, e.g. `models--acme--foo`
    pub fn cache_dir_name(&self) -> String {
        format!("models--{}--{}", self.org, self.name)
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org, self.name)
    }
}

impl std::str::FromStr for ModelId {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Paths derived from a cache root and a model id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLayout {
    pub model_root: PathBuf,
    pub refs_main: PathBuf,
    pub snapshots_dir: PathBuf,
}

impl RepoLayout {
    pub fn new(cache_root: &Path, model_id: &ModelId) -> Self {
        let model_root = cache_root.join(model_id.cache_dir_name());
        Self {
            refs_main: model_root.join("refs").join("main"),
            snapshots_dir: model_root.join("snapshots"),
            model_root,
        }
    }

    /// Snapshot named by `refs/main`, if the pointer exists and its target is on disk
    pub fn preferred_snapshot(&self) -> Option<PathBuf> {
        if !self.refs_main.is_file() {
            tracing::info!(refs_main = ?self.refs_main, "refs/main not present");
            return None;
        }

        let hash = match std::fs::read_to_string(&self.refs_main) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                tracing::warn!(refs_main = ?self.refs_main, error = %e, "Failed to read refs/main");
                return None;
            }
        };

        if hash.is_empty() {
            tracing::warn!(refs_main = ?self.refs_main, "refs/main is empty");
            return None;
        }

        // The pointer must name a single entry inside snapshots/
        let mut components = Path::new(&hash).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) {
            tracing::warn!(refs_main = ?self.refs_main, hash = %hash, "refs/main is not a snapshot name");
            return None;
        }

        let candidate = self.snapshots_dir.join(&hash);
        if candidate.is_dir() {
            tracing::info!(snapshot = ?candidate, "Using snapshot from refs/main");
            Some(candidate)
        } else {
            tracing::warn!(snapshot = ?candidate, "Snapshot from refs/main not found on disk");
            None
        }
    }

    /// Snapshot directory names in byte order
    pub fn snapshot_names(&self) -> Result<Vec<OsString>, ResolveError> {
        let entries =
            std::fs::read_dir(&self.snapshots_dir).map_err(|_| ResolveError::CacheNotFound {
                path: self.snapshots_dir.clone(),
            })?;

        let mut names: Vec<OsString> = entries
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .map(|entry| entry.file_name())
            .collect();
        names.sort();
        Ok(names)
    }
}

/// Resolve the local snapshot directory for `model_id` inside `cache_root`
pub fn resolve(model_id: &str, cache_root: &Path) -> Result<PathBuf, ResolveError> {
    let id = ModelId::parse(model_id)?;
    resolve_model(&id, cache_root)
}

/// Same as [`resolve`] for an already parsed id
pub fn resolve_model(model_id: &ModelId, cache_root: &Path) -> Result<PathBuf, ResolveError> {
    let layout = RepoLayout::new(cache_root, model_id);

    tracing::info!(
        model_id = %model_id,
        model_root = ?layout.model_root,
        refs_main = ?layout.refs_main,
        snapshots_dir = ?layout.snapshots_dir,
        "Resolving snapshot"
    );

    if let Some(path) = layout.preferred_snapshot() {
        return Ok(path);
    }

    tracing::info!(snapshots_dir = ?layout.snapshots_dir, "Falling back to snapshot scan");

    if !layout.snapshots_dir.is_dir() {
        return Err(ResolveError::CacheNotFound {
            path: layout.snapshots_dir,
        });
    }

    let names = layout.snapshot_names()?;
    let first = names
        .first()
        .ok_or_else(|| ResolveError::NoSnapshotsAvailable {
            path: layout.snapshots_dir.clone(),
        })?;

    let chosen = layout.snapshots_dir.join(first);
    tracing::info!(
        snapshot = ?chosen,
        candidates = names.len(),
        "Using first available snapshot"
    );
    Ok(chosen)
}
