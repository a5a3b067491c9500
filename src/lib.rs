//! Model Store worker - serverless text generation from a local hub cache
//!
//! Resolves a model snapshot from a Hugging Face style cache once per process,
//! loads it, and answers text-generation jobs from a serverless job runtime.

pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod inference;
pub mod metrics;
pub mod models;
pub mod worker;

pub use config::{DeviceChoice, Precision, WorkerConfig};
pub use context::WorkerContext;
pub use error::{GenerationError, LoadError, ResolveError};
pub use handler::{GenerationRequest, GenerationResponse, Job, JobHandler};
pub use inference::{GeneratedText, SamplingParams, TextGenerator};
pub use models::{ModelId, resolve};
pub use worker::{JobTransport, JobWorker, RunpodTransport};
