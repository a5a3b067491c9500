//! Model Store worker - Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use modelstore_worker::{
    JobWorker, RunpodTransport, WorkerConfig, WorkerContext, api, context::locate_snapshot,
    metrics, models, worker,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "modelstore-worker")]
#[command(about = "Serverless text-generation worker for locally cached models", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "json", global = true)]
    log_format: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the serverless runtime for jobs (default)
    Worker,
    /// Serve the local test API
    Serve {
        /// Override API port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run a single job and print the result
    Test {
        /// Job JSON, e.g. '{"input": {"prompt": "Hi"}}'. Defaults to ./test_input.json
        #[arg(long)]
        test_input: Option<String>,
    },
    /// Print the resolved snapshot path without loading the model
    Resolve,
    /// List models present in the cache root
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    match cli.log_format.as_str() {
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .json()
                .init();
        }
    }

    let mut config = WorkerConfig::load(cli.config)?;
    let command = cli.command.unwrap_or(Command::Worker);

    if let Command::Serve { port: Some(port) } = command {
        config.api_port = port;
    }

    config.validate()?;

    tracing::info!(
        model_name = %config.model_name,
        cache_root = ?config.cache_root,
        offline = config.offline,
        precision = ?config.precision,
        "Configuration loaded"
    );

    match command {
        Command::Resolve => {
            let path = locate_snapshot(&config).await?;
            println!("{}", path.display());
            Ok(())
        }
        Command::List => {
            let cached = models::list_cached_models(&config.cache_root);
            println!("{}", serde_json::to_string_pretty(&cached)?);
            Ok(())
        }
        Command::Test { test_input } => {
            let context = WorkerContext::startup(config).await?;
            run_test_input(&context, test_input.as_deref()).await
        }
        Command::Serve { .. } => {
            let prometheus_handle = metrics::setup_metrics()?;
            let context = WorkerContext::startup(config).await?;
            serve(context, prometheus_handle).await
        }
        Command::Worker => {
            let _prometheus_handle = metrics::setup_metrics()?;
            let context = WorkerContext::startup(config).await?;

            if std::env::var_os("RUNPOD_WEBHOOK_GET_JOB").is_none() {
                tracing::warn!("RUNPOD_WEBHOOK_GET_JOB not set, running local test input");
                return run_test_input(&context, None).await;
            }

            let transport = Arc::new(RunpodTransport::from_env()?);
            JobWorker::new(context, transport)
                .run(shutdown_signal())
                .await;
            tracing::info!("Shutdown complete");
            Ok(())
        }
    }
}

async fn run_test_input(context: &WorkerContext, inline: Option<&str>) -> Result<()> {
    let job = worker::load_test_input(inline, Path::new("test_input.json"))?;
    let output = context.handler.handle(&job).await;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn serve(
    context: Arc<WorkerContext>,
    prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
) -> Result<()> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], context.config.api_port));
    tracing::info!(
        addr = %addr,
        model = %context.generator_description(),
        "Starting local test API"
    );

    let app = api::create_router(api::AppState {
        context,
        prometheus_handle,
    });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind API server")?;

    // Graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
