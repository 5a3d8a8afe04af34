//! wgnetd - WireGuard network driver daemon for Docker.
//!
//! Serves the Docker remote network driver protocol on a Unix socket.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::UnixListener;
use tokio::signal::unix::{SignalKind, signal};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wgnet_common::WgNetPaths;
use wgnet_common::paths::DEFAULT_SOCKET;
use wgnet_network::{Host, Orchestrator};

mod api;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Unix socket to serve the plugin protocol on
    #[arg(long, env = "WGNET_SOCKET", default_value = DEFAULT_SOCKET)]
    socket: PathBuf,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let host = Host::new(WgNetPaths::new()).context("failed to open the root network namespace")?;
    let orchestrator = Arc::new(Orchestrator::new(host));
    orchestrator
        .initialize()
        .context("failed to set up forwarding chains")?;

    let served = serve(&args.socket, orchestrator.clone()).await;

    if let Err(e) = orchestrator.shutdown().await {
        tracing::error!(error = %e, "Shutdown did not complete cleanly");
    }
    if let Err(e) = std::fs::remove_file(&args.socket) {
        tracing::debug!(error = %e, "Socket already gone");
    }
    tracing::info!("wgnetd stopped");

    served
}

async fn serve(socket: &Path, orchestrator: Arc<Orchestrator>) -> anyhow::Result<()> {
    remove_stale_socket(socket)?;
    let listener = UnixListener::bind(socket)
        .with_context(|| format!("failed to bind {}", socket.display()))?;
    tracing::info!(socket = %socket.display(), "wgnetd listening");

    let mut sigint = signal(SignalKind::interrupt()).context("failed to set up SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("failed to set up SIGTERM handler")?;

    axum::serve(listener, api::server::app(orchestrator))
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = sigint.recv() => tracing::info!("Received SIGINT, shutting down"),
                _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
            }
        })
        .await
        .context("plugin server failed")
}

/// Remove a socket left behind by a previous run.
fn remove_stale_socket(socket: &Path) -> anyhow::Result<()> {
    match std::fs::remove_file(socket) {
        Ok(()) => {
            tracing::debug!(socket = %socket.display(), "Removed stale socket");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to remove {}", socket.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_socket() {
        let args = Args::try_parse_from(["wgnetd"]).unwrap();
        assert_eq!(args.socket, PathBuf::from("wg"));
        assert!(!args.log_json);
    }

    #[test]
    fn socket_flag() {
        let args =
            Args::try_parse_from(["wgnetd", "--socket", "/run/docker/plugins/wg.sock"]).unwrap();
        assert_eq!(args.socket, PathBuf::from("/run/docker/plugins/wg.sock"));
    }

    #[test]
    fn stale_socket_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wg");
        std::fs::write(&path, b"").unwrap();

        remove_stale_socket(&path).unwrap();
        assert!(!path.exists());
        remove_stale_socket(&path).unwrap();
    }
}
