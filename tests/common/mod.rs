//! Shared fixtures: hub cache layouts and stand-in generators

#![allow(dead_code)]

use modelstore_worker::{GeneratedText, GenerationError, SamplingParams, TextGenerator};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Build `models--{org}--{name}` with the given snapshot dirs and optional refs/main
pub fn write_repo(cache_root: &Path, model_id: &str, snapshots: &[&str], refs_main: Option<&str>) -> PathBuf {
    let model_root = cache_root.join(format!("models--{}", model_id.replacen('/', "--", 1)));
    std::fs::create_dir_all(model_root.join("snapshots")).unwrap();

    for snapshot in snapshots {
        std::fs::create_dir_all(model_root.join("snapshots").join(snapshot)).unwrap();
    }

    if let Some(hash) = refs_main {
        std::fs::create_dir_all(model_root.join("refs")).unwrap();
        std::fs::write(model_root.join("refs/main"), hash).unwrap();
    }

    model_root
}

/// Appends a fixed continuation to the prompt and records every call
#[derive(Default)]
pub struct MockGenerator {
    pub calls: Mutex<Vec<(String, SamplingParams)>>,
}

impl TextGenerator for MockGenerator {
    fn generate(
        &self,
        prompt: &str,
        params: &SamplingParams,
    ) -> Result<Vec<GeneratedText>, GenerationError> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), params.clone()));
        Ok(vec![GeneratedText {
            generated_text: format!("{prompt} there, how can I help?"),
            tokens_generated: 7,
        }])
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

/// Always fails the way an exhausted GPU would
pub struct FailingGenerator;

impl TextGenerator for FailingGenerator {
    fn generate(
        &self,
        _prompt: &str,
        _params: &SamplingParams,
    ) -> Result<Vec<GeneratedText>, GenerationError> {
        Err(GenerationError::Failed(
            "CUDA out of memory. Tried to allocate 2.00 GiB".to_string(),
        ))
    }

    fn describe(&self) -> String {
        "failing".to_string()
    }
}

/// Panics inside the blocking generation task
pub struct PanickingGenerator;

impl TextGenerator for PanickingGenerator {
    fn generate(
        &self,
        _prompt: &str,
        _params: &SamplingParams,
    ) -> Result<Vec<GeneratedText>, GenerationError> {
        panic!("kernel launch failed");
    }

    fn describe(&self) -> String {
        "panicking".to_string()
    }
}

/// Succeeds with no sequences
pub struct EmptyGenerator;

impl TextGenerator for EmptyGenerator {
    fn generate(
        &self,
        _prompt: &str,
        _params: &SamplingParams,
    ) -> Result<Vec<GeneratedText>, GenerationError> {
        Ok(Vec::new())
    }

    fn describe(&self) -> String {
        "empty".to_string()
    }
}
