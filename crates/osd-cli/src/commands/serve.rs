//! `osd serve` — Run the agent on its local socket.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use osd_agent::Agent;
use osd_agent::oci::OciRunner;
use osd_common::config::OsdConfig;
use osd_rpc::Server;
use osd_runtime::local::LocalRuntime;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

/// Arguments for the `serve` command.
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// JSON configuration file.
    #[arg(long, env = "OSD_CONFIG")]
    pub config: Option<PathBuf>,

    /// State index directory of the container runtime.
    #[arg(long, env = "OSD_RUNTIME_ROOT")]
    pub runtime_root: Option<PathBuf>,

    /// Size of each streamed log chunk in bytes.
    #[arg(long, env = "OSD_LOG_CHUNK_SIZE")]
    pub chunk_size: Option<usize>,
}

/// Executes the `serve` command.
///
/// Serves until Ctrl-C or SIGTERM, then stops accepting connections,
/// cancels in-flight log streams, and removes the socket.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the socket cannot
/// be bound.
pub async fn execute(args: ServeArgs, socket: Option<PathBuf>) -> anyhow::Result<()> {
    let config = resolve_config(&args, socket)?;
    tracing::info!(
        socket = %config.socket_path.display(),
        runtime_root = %config.runtime_root.display(),
        chunk_size = config.log_chunk_size,
        "starting agent"
    );

    let connector = Arc::new(LocalRuntime::new(&config.runtime_root));
    let runner = Arc::new(OciRunner::new(
        &config.reset.runtime_binary,
        &config.reset.bundle_dir,
    ));
    let socket_path = config.socket_path.clone();
    let agent = Agent::new(connector, runner, config);
    let server = Server::bind(&socket_path, agent)
        .with_context(|| format!("failed to bind {}", socket_path.display()))?;

    let shutdown = CancellationToken::new();
    let mut terminate = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let watcher = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received, shutting down"),
                _ = terminate.recv() => tracing::info!("SIGTERM received, shutting down"),
            }
            shutdown.cancel();
        })
    };

    server.serve(shutdown).await?;
    watcher.abort();
    tracing::info!("agent stopped");
    Ok(())
}

/// Builds the effective configuration: file (if any), then flag overrides.
fn resolve_config(args: &ServeArgs, socket: Option<PathBuf>) -> anyhow::Result<OsdConfig> {
    let mut config = match &args.config {
        Some(path) => OsdConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => OsdConfig::default(),
    };
    if let Some(socket) = socket {
        config.socket_path = socket;
    }
    if let Some(root) = &args.runtime_root {
        config.runtime_root.clone_from(root);
    }
    if let Some(size) = args.chunk_size {
        config.log_chunk_size = size;
    }
    config.validate()?;
    Ok(config)
}
