//! Serverless job loop
//!
//! Pulls jobs from the runtime's job-take webhook, runs them through the
//! handler and posts each result back. One job at a time.

use crate::context::WorkerContext;
use crate::handler::{GenerationResponse, Job};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Trait Definitions
// ============================================================================

/// Source of jobs and sink for their results
#[async_trait]
pub trait JobTransport: Send + Sync {
    /// Take the next job. `None` when the queue is empty.
    async fn next_job(&self) -> Result<Option<Job>>;

    /// Report a finished job
    async fn post_output(&self, job_id: &str, output: &GenerationResponse) -> Result<()>;
}

// ============================================================================
// RunPod webhook transport
// ============================================================================

/// Result body posted to the job-done webhook
#[derive(Debug, Serialize)]
struct JobResult<'a> {
    output: &'a GenerationResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

/// Substitute the worker id into the job-take template
pub fn job_take_url(template: &str, pod_id: &str) -> String {
    template.replace("$ID", pod_id)
}

/// Substitute worker and job ids into the job-done template
pub fn job_done_url(template: &str, pod_id: &str, job_id: &str) -> String {
    let url = template
        .replace("$RUNPOD_POD_ID", pod_id)
        .replace("$ID", job_id);
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}isStream=false", url, separator)
}

/// Transport speaking the RunPod worker webhook protocol
pub struct RunpodTransport {
    client: reqwest::Client,
    take_url: String,
    done_template: String,
    pod_id: String,
    api_key: String,
}

impl RunpodTransport {
    pub fn new(take_template: &str, done_template: String, pod_id: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            take_url: job_take_url(take_template, &pod_id),
            done_template,
            pod_id,
            api_key,
        }
    }

    /// Build from `RUNPOD_WEBHOOK_GET_JOB`, `RUNPOD_WEBHOOK_POST_OUTPUT`,
    /// `RUNPOD_POD_ID` and `RUNPOD_AI_API_KEY`
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| {
            std::env::var(name).with_context(|| format!("{} is not set", name))
        };

        Ok(Self::new(
            &var("RUNPOD_WEBHOOK_GET_JOB")?,
            var("RUNPOD_WEBHOOK_POST_OUTPUT")?,
            var("RUNPOD_POD_ID")?,
            var("RUNPOD_AI_API_KEY")?,
        ))
    }
}

#[async_trait]
impl JobTransport for RunpodTransport {
    async fn next_job(&self) -> Result<Option<Job>> {
        let response = self
            .client
            .get(&self.take_url)
            .header(reqwest::header::AUTHORIZATION, &self.api_key)
            .send()
            .await
            .context("Job take request failed")?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            StatusCode::OK => {
                let body = response.text().await.context("Failed to read job body")?;
                if body.trim().is_empty() {
                    return Ok(None);
                }
                let job: Job = serde_json::from_str(&body).context("Invalid job JSON")?;
                Ok(Some(job))
            }
            status => anyhow::bail!("Job take returned HTTP {}", status),
        }
    }

    async fn post_output(&self, job_id: &str, output: &GenerationResponse) -> Result<()> {
        let url = job_done_url(&self.done_template, &self.pod_id, job_id);
        let error = match output {
            GenerationResponse::Error { error } => Some(error.as_str()),
            GenerationResponse::Success { .. } => None,
        };

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, &self.api_key)
            .json(&JobResult { output, error })
            .send()
            .await
            .context("Job result request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("Job result returned HTTP {}", response.status());
        }

        Ok(())
    }
}

// ============================================================================
// Worker loop
// ============================================================================

pub struct JobWorker {
    context: Arc<WorkerContext>,
    transport: Arc<dyn JobTransport>,
    poll_interval: Duration,
}

impl JobWorker {
    pub fn new(context: Arc<WorkerContext>, transport: Arc<dyn JobTransport>) -> Self {
        let poll_interval = Duration::from_millis(context.config.poll_interval_ms);
        Self {
            context,
            transport,
            poll_interval,
        }
    }

    /// Take and process at most one job. Returns whether a job was handled.
    pub async fn poll_once(&self) -> Result<bool> {
        let Some(mut job) = self.transport.next_job().await? else {
            return Ok(false);
        };

        let job_id = job
            .id
            .get_or_insert_with(|| format!("local-{}", uuid::Uuid::new_v4()))
            .clone();
        tracing::info!(job_id = %job_id, "Received job");

        let output = self.context.handler.handle(&job).await;

        if let Err(e) = self.transport.post_output(&job_id, &output).await {
            crate::metrics::record_runtime_error("post_output");
            tracing::error!(job_id = %job_id, error = %e, "Failed to post job result");
        }

        Ok(true)
    }

    /// Poll until `shutdown` resolves
    pub async fn run(self, shutdown: impl std::future::Future<Output = ()>) {
        tokio::pin!(shutdown);

        tracing::info!(
            model_id = %self.context.model_id,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Worker started"
        );

        loop {
            let idle = match self.poll_once().await {
                Ok(handled) => !handled,
                Err(e) => {
                    crate::metrics::record_runtime_error("next_job");
                    tracing::warn!(error = %e, "Failed to take job");
                    true
                }
            };

            let pause = if idle {
                self.poll_interval
            } else {
                Duration::ZERO
            };

            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        tracing::info!("Worker stopped");
    }
}

// ============================================================================
// Test input
// ============================================================================

/// Load a single job from `--test-input` JSON or from `test_input.json`
pub fn load_test_input(inline: Option<&str>, default_path: &Path) -> Result<Job> {
    let raw = match inline {
        Some(json) => json.to_string(),
        None => std::fs::read_to_string(default_path)
            .with_context(|| format!("Failed to read test input: {:?}", default_path))?,
    };

    let mut job: Job = serde_json::from_str(&raw).context("Invalid test input JSON")?;
    job.id.get_or_insert_with(|| "local_test".to_string());
    Ok(job)
}
