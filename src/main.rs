mod auth;
mod config;
mod launcher;
mod mediator;
mod ssh;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::store::{MemoryStore, RepoStore};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "gitgate", about = "SSH gateway serving restricted git commands")]
struct Cli {
    /// Path to the SSH host private key. The public half is expected next
    /// to it at `<path>.pub`.
    host_key: PathBuf,

    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// State shared across all connection handlers, constructed once at
/// startup.
pub struct AppState {
    pub config: Arc<Config>,
    /// Credential store, read concurrently by every session.
    pub store: Arc<dyn RepoStore>,
    /// Resolved path of the restricted shell.
    pub shell: PathBuf,
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT"),
        () = terminate => info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(config::load_config(cli.config.as_deref())?);
    info!(listen = %config.listen, "starting gitgate");

    // Startup preconditions: a server that cannot serve git commands or
    // prove its identity must not bind a socket.
    let shell = launcher::find_git_shell(config.shell.as_deref())?;
    info!(shell = %shell.display(), "restricted shell located");

    let host_key = ssh::server::load_host_key(&cli.host_key)?;

    let store: Arc<dyn RepoStore> = match &config.users_file {
        Some(path) => {
            let store = MemoryStore::from_file(path)?;
            info!(users = store.user_count(), users_file = %path.display(), "credential store loaded");
            Arc::new(store)
        }
        None => {
            warn!("no users_file configured; every connection will be rejected");
            Arc::new(MemoryStore::default())
        }
    };

    let state = Arc::new(AppState {
        config: Arc::clone(&config),
        store,
        shell,
    });

    tokio::select! {
        result = ssh::start_ssh_server(state, host_key) => result?,
        () = shutdown_signal() => info!("shutdown signal received"),
    }

    info!("gitgate shut down cleanly");
    Ok(())
}
