//! Configuration structures and loading logic

use crate::models::ModelId;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Weight precision used when loading the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// Follow the checkpoint's `torch_dtype` where the device supports it
    #[default]
    Auto,
    Bf16,
    Fp16,
    Fp32,
}

impl std::str::FromStr for Precision {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "bf16" | "bfloat16" => Ok(Self::Bf16),
            "fp16" | "f16" | "float16" => Ok(Self::Fp16),
            "fp32" | "f32" | "float32" => Ok(Self::Fp32),
            other => anyhow::bail!("Unknown precision '{}'", other),
        }
    }
}

/// Compute device selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceChoice {
    /// CUDA device 0 if available, CPU otherwise
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl std::str::FromStr for DeviceChoice {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            other => anyhow::bail!("Unknown device '{}'", other),
        }
    }
}

/// Main worker configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Hub model id, `org/name`
    pub model_name: String,
    /// Root of the hub-style cache (the directory holding `models--*`)
    pub cache_root: PathBuf,
    /// Never touch the network; the snapshot must already be on disk
    pub offline: bool,
    pub precision: Precision,
    pub device: DeviceChoice,

    pub default_prompt: String,
    pub default_max_tokens: usize,
    pub default_temperature: f64,
    pub top_p: Option<f64>,
    pub seed: u64,
    /// Prepend the prompt to the generated text
    pub return_full_text: bool,

    /// Port for `serve`
    pub api_port: u16,
    /// Delay between empty job polls
    pub poll_interval_ms: u64,

    #[serde(skip_serializing)]
    pub hf_token: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            cache_root: default_cache_root(),
            offline: true,
            precision: Precision::Auto,
            device: DeviceChoice::Auto,
            default_prompt: default_prompt(),
            default_max_tokens: 256,
            default_temperature: 0.7,
            top_p: None,
            seed: 299792458,
            return_full_text: true,
            api_port: 8000,
            poll_interval_ms: 1000,
            hf_token: None,
        }
    }
}

/// Truthy values accepted by the hub offline flags
fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl WorkerConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        config.apply_env()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(model_name) = std::env::var("MODEL_NAME") {
            self.model_name = model_name;
        }
        if let Ok(cache_root) = std::env::var("HF_CACHE_ROOT") {
            self.cache_root = PathBuf::from(cache_root);
        }
        for flag in ["HF_HUB_OFFLINE", "TRANSFORMERS_OFFLINE"] {
            if let Ok(value) = std::env::var(flag) {
                if is_truthy(&value) {
                    self.offline = true;
                } else if flag == "HF_HUB_OFFLINE" {
                    self.offline = false;
                }
            }
        }
        if let Ok(precision) = std::env::var("MODELSTORE_PRECISION") {
            self.precision = precision
                .parse()
                .context("Invalid MODELSTORE_PRECISION value")?;
        }
        if let Ok(device) = std::env::var("MODELSTORE_DEVICE") {
            self.device = device.parse().context("Invalid MODELSTORE_DEVICE value")?;
        }
        if let Ok(port) = std::env::var("MODELSTORE_API_PORT") {
            self.api_port = port.parse().context("Invalid MODELSTORE_API_PORT value")?;
        }
        if let Ok(token) = std::env::var("HF_TOKEN") {
            self.hf_token = Some(token);
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        ModelId::parse(&self.model_name)?;

        if self.default_max_tokens == 0 {
            anyhow::bail!("default_max_tokens must be > 0");
        }
        if !(self.default_temperature.is_finite() && self.default_temperature > 0.0) {
            anyhow::bail!(
                "default_temperature must be a positive number (got {})",
                self.default_temperature
            );
        }
        if let Some(top_p) = self.top_p
            && !(top_p > 0.0 && top_p <= 1.0)
        {
            anyhow::bail!("top_p must be in (0, 1] (got {})", top_p);
        }
        if self.api_port < 1024 {
            anyhow::bail!("API port must be >= 1024 (got {})", self.api_port);
        }

        Ok(())
    }
}

// Default functions
fn default_model_name() -> String {
    "microsoft/Phi-3-mini-4k-instruct".to_string()
}
fn default_cache_root() -> PathBuf {
    PathBuf::from("/runpod-volume/huggingface-cache/hub")
}
fn default_prompt() -> String {
    "Hello from Model Store offline test!".to_string()
}
