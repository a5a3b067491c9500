//! Job handler
//!
//! Turns one job payload into a [`GenerationResponse`]. Nothing here fails
//! outward: bad parameters and generation errors both become an error envelope
//! so the serving loop keeps going.

use crate::config::WorkerConfig;
use crate::error::GenerationError;
use crate::inference::{SamplingParams, TextGenerator};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;

/// One job as delivered by the runtime: `{"id": "...", "input": {...}}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Job {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub input: Option<Value>,
}

impl Job {
    pub fn new(input: Value) -> Self {
        Self {
            id: None,
            input: Some(input),
        }
    }
}

/// Job result envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationResponse {
    Success { output: String },
    Error { error: String },
}

impl GenerationResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, GenerationResponse::Success { .. })
    }

    fn status_label(&self) -> &'static str {
        match self {
            GenerationResponse::Success { .. } => "success",
            GenerationResponse::Error { .. } => "error",
        }
    }
}

impl From<GenerationError> for GenerationResponse {
    fn from(err: GenerationError) -> Self {
        GenerationResponse::Error {
            error: err.to_string(),
        }
    }
}

/// Values used when a job omits a parameter
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationDefaults {
    pub prompt: String,
    pub max_tokens: usize,
    pub temperature: f64,
    pub top_p: Option<f64>,
    pub seed: u64,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for GenerationDefaults {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            prompt: config.default_prompt.clone(),
            max_tokens: config.default_max_tokens,
            temperature: config.default_temperature,
            top_p: config.top_p,
            seed: config.seed,
        }
    }
}

/// Parameters of one job after defaults and coercion
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: usize,
    pub temperature: f64,
}

impl GenerationRequest {
    /// Read `prompt`, `max_tokens` and `temperature` from a job's `input`.
    ///
    /// A missing or `null` input, and missing or `null` fields, take the
    /// defaults. Numbers may arrive as JSON numbers or numeric strings.
    pub fn from_input(
        input: Option<&Value>,
        defaults: &GenerationDefaults,
    ) -> Result<Self, GenerationError> {
        let empty = Map::new();
        let fields = match input {
            None | Some(Value::Null) => &empty,
            Some(Value::Object(fields)) => fields,
            Some(other) => {
                return Err(GenerationError::InvalidRequest(format!(
                    "input must be an object, got {}",
                    json_type(other)
                )));
            }
        };

        let prompt = match fields.get("prompt") {
            None | Some(Value::Null) => defaults.prompt.clone(),
            Some(Value::String(prompt)) => prompt.clone(),
            Some(other) => {
                return Err(GenerationError::InvalidRequest(format!(
                    "prompt must be a string, got {}",
                    json_type(other)
                )));
            }
        };

        let max_tokens = match fields.get("max_tokens") {
            None | Some(Value::Null) => defaults.max_tokens,
            Some(value) => coerce_token_count(value)?,
        };

        let temperature = match fields.get("temperature") {
            None | Some(Value::Null) => defaults.temperature,
            Some(value) => coerce_temperature(value)?,
        };

        Ok(Self {
            prompt,
            max_tokens,
            temperature,
        })
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Positive integer count; fractional numbers truncate, strings must hold an integer
fn coerce_token_count(value: &Value) -> Result<usize, GenerationError> {
    let invalid = || GenerationError::InvalidRequest(format!("invalid max_tokens: {}", value));

    let count = match value {
        Value::Number(n) => match n.as_u64() {
            Some(count) => count,
            None => {
                let f = n.as_f64().ok_or_else(invalid)?;
                if !f.is_finite() || f < 0.0 {
                    return Err(invalid());
                }
                f.trunc() as u64
            }
        },
        Value::String(s) => s.trim().parse::<u64>().map_err(|_| invalid())?,
        _ => return Err(invalid()),
    };

    if count == 0 {
        return Err(GenerationError::InvalidRequest(
            "max_tokens must be at least 1".to_string(),
        ));
    }

    usize::try_from(count).map_err(|_| invalid())
}

/// Strictly positive float; numeric strings accepted
fn coerce_temperature(value: &Value) -> Result<f64, GenerationError> {
    let invalid = || GenerationError::InvalidRequest(format!("invalid temperature: {}", value));

    let temperature = match value {
        Value::Number(n) => n.as_f64().ok_or_else(invalid)?,
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| invalid())?,
        _ => return Err(invalid()),
    };

    if !temperature.is_finite() || temperature <= 0.0 {
        return Err(GenerationError::InvalidRequest(format!(
            "temperature must be strictly positive, got {}",
            temperature
        )));
    }

    Ok(temperature)
}

fn prompt_preview(prompt: &str) -> String {
    prompt.chars().take(80).collect()
}

/// Handles jobs against a loaded generator
#[derive(Clone)]
pub struct JobHandler {
    generator: Arc<dyn TextGenerator>,
    defaults: GenerationDefaults,
}

impl JobHandler {
    pub fn new(generator: Arc<dyn TextGenerator>, defaults: GenerationDefaults) -> Self {
        Self {
            generator,
            defaults,
        }
    }

    /// Process one job. Always returns an envelope.
    pub async fn handle(&self, job: &Job) -> GenerationResponse {
        let response = match GenerationRequest::from_input(job.input.as_ref(), &self.defaults) {
            Ok(request) => self.generate(job, request).await,
            Err(e) => {
                tracing::warn!(job_id = ?job.id, error = %e, "Rejected job input");
                e.into()
            }
        };

        crate::metrics::record_job(response.status_label());
        response
    }

    async fn generate(&self, job: &Job, request: GenerationRequest) -> GenerationResponse {
        tracing::info!(
            job_id = ?job.id,
            prompt = %prompt_preview(&request.prompt),
            max_tokens = request.max_tokens,
            temperature = request.temperature,
            "Handling job"
        );

        let params = SamplingParams {
            max_new_tokens: request.max_tokens,
            do_sample: true,
            temperature: request.temperature,
            top_p: self.defaults.top_p,
            seed: self.defaults.seed,
        };

        let generator = self.generator.clone();
        let prompt = request.prompt;
        let started = Instant::now();

        let result =
            tokio::task::spawn_blocking(move || generator.generate(&prompt, &params)).await;

        let outputs = match result {
            Ok(Ok(outputs)) => outputs,
            Ok(Err(e)) => {
                tracing::error!(job_id = ?job.id, error = %e, "Error during generation");
                return e.into();
            }
            Err(join_error) => {
                tracing::error!(job_id = ?job.id, error = %join_error, "Generation task failed");
                return GenerationError::Failed(format!("generation task failed: {}", join_error))
                    .into();
            }
        };

        let Some(first) = outputs.into_iter().next() else {
            tracing::error!(job_id = ?job.id, "Generation returned no results");
            return GenerationError::Empty.into();
        };

        let elapsed = started.elapsed();
        crate::metrics::record_generation(elapsed, first.tokens_generated);
        tracing::info!(
            job_id = ?job.id,
            generated_chars = first.generated_text.chars().count(),
            tokens_generated = first.tokens_generated,
            elapsed_ms = elapsed.as_millis() as u64,
            "Generation complete"
        );

        GenerationResponse::Success {
            output: first.generated_text,
        }
    }
}
