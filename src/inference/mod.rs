//! Text generation backends
//!
//! The handler talks to a [`TextGenerator`]; the production implementation is
//! [`CandleGenerator`], tests substitute their own.

pub mod candle;
pub mod device;

pub use candle::CandleGenerator;
pub use device::DeviceProfile;

use crate::error::GenerationError;
use std::sync::{Mutex, MutexGuard};

/// Sampling parameters for one generation call
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    pub max_new_tokens: usize,
    /// Sample from the distribution instead of taking the argmax
    pub do_sample: bool,
    pub temperature: f64,
    pub top_p: Option<f64>,
    pub seed: u64,
}

/// One generated sequence
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedText {
    pub generated_text: String,
    pub tokens_generated: usize,
}

/// A loaded model that turns prompts into text
///
/// Calls block; async callers run them on a blocking thread.
pub trait TextGenerator: Send + Sync {
    /// Generate continuations for `prompt`. Implementations return at least one
    /// sequence on success; the handler uses the first.
    fn generate(
        &self,
        prompt: &str,
        params: &SamplingParams,
    ) -> Result<Vec<GeneratedText>, GenerationError>;

    /// Short description for logs and health output
    fn describe(&self) -> String;
}

/// Lock a model, taking it back from a generation call that panicked.
///
/// Only for state that every call resets before use, such as a KV cache.
pub(crate) fn lock_model<T>(model: &Mutex<T>) -> MutexGuard<'_, T> {
    model.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Previous generation panicked, reusing model");
        model.clear_poison();
        poisoned.into_inner()
    })
}
