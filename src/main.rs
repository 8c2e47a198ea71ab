#![forbid(unsafe_code)]

//! `specwright`: interactive task-specification pipeline server.
//!
//! Bootstraps configuration and serves one WebSocket endpoint per stage
//! selector until a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use specwright::agent::openai::OpenAiAgent;
use specwright::config::GlobalConfig;
use specwright::persistence::DocumentStore;
use specwright::session::AppState;
use specwright::transport::ws;
use specwright::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "specwright", about = "Interactive task-specification pipeline server", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the task document root directory.
    #[arg(long)]
    task_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("specwright server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = GlobalConfig::load_from_path(&args.config)?;

    if let Some(dir) = args.task_dir {
        config.task_dir = dir
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid task_dir override: {err}")))?;
    }

    config.load_credentials();
    let config = Arc::new(config);
    info!(task_dir = %config.task_dir.display(), "configuration loaded");

    let state = Arc::new(AppState {
        config: Arc::clone(&config),
        store: DocumentStore::new(config.task_dir.clone()),
        agent: Arc::new(OpenAiAgent::new(Arc::clone(&config))),
    });

    let ct = CancellationToken::new();
    let server_ct = ct.clone();
    let server = tokio::spawn(async move {
        if let Err(err) = ws::serve(state, server_ct).await {
            error!(%err, "websocket transport failed");
        }
    });

    info!("specwright server ready");

    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    if let Err(err) = server.await {
        error!(%err, "server task did not finish cleanly");
    }
    info!("specwright shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
