//! SSH server bootstrap and the [`russh::server::Server`] implementation.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use russh::server::{self, Server};
use russh::MethodSet;
use russh_keys::key::KeyPair;
use russh_keys::PublicKeyBase64;
use tracing::info;

use super::session::SshSession;
use crate::AppState;

// ---------------------------------------------------------------------------
// Server type
// ---------------------------------------------------------------------------

/// Top-level SSH server that hands each incoming connection to an
/// [`SshSession`] handler.
pub struct GateServer {
    state: Arc<AppState>,
}

impl GateServer {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

impl server::Server for GateServer {
    type Handler = SshSession;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> Self::Handler {
        info!(peer = ?peer_addr, "new SSH client connection");
        SshSession::new(Arc::clone(&self.state), peer_addr)
    }
}

// ---------------------------------------------------------------------------
// Host key loading
// ---------------------------------------------------------------------------

/// Load the host key pair from `path`, with the public half expected at
/// `<path>.pub`.
///
/// The public key file must decode and correspond to the private key; a
/// stale `.pub` next to a rotated private key would otherwise go unnoticed
/// until clients start failing host verification.
pub fn load_host_key(path: &Path) -> Result<KeyPair> {
    let key = russh_keys::load_secret_key(path, None)
        .with_context(|| format!("failed to load host private key: {}", path.display()))?;

    let pub_path = PathBuf::from(format!("{}.pub", path.display()));
    let contents = std::fs::read_to_string(&pub_path)
        .with_context(|| format!("failed to read host public key: {}", pub_path.display()))?;
    let blob = contents
        .split_whitespace()
        .nth(1)
        .with_context(|| format!("malformed host public key file: {}", pub_path.display()))?;
    let public = russh_keys::parse_public_key_base64(blob)
        .with_context(|| format!("failed to decode host public key: {}", pub_path.display()))?;

    anyhow::ensure!(
        public.public_key_base64() == key.public_key_base64(),
        "host public key {} does not match the private key",
        pub_path.display(),
    );

    Ok(key)
}

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Start the SSH listener. Runs until the server is shut down or an
/// unrecoverable error occurs.
pub async fn start_ssh_server(state: Arc<AppState>, host_key: KeyPair) -> Result<()> {
    let listen_addr: SocketAddr = state
        .config
        .listen
        .parse()
        .with_context(|| format!("invalid listen address: {:?}", state.config.listen))?;

    let config = Arc::new(server::Config {
        keys: vec![host_key],
        methods: MethodSet::PUBLICKEY,
        preferred: russh::Preferred::DEFAULT,
        inactivity_timeout: Some(Duration::from_secs(state.config.inactivity_timeout_secs)),
        auth_rejection_time: Duration::from_secs(1),
        auth_rejection_time_initial: Some(Duration::from_secs(0)),
        max_auth_attempts: state.config.max_auth_attempts,
        ..Default::default()
    });

    info!(address = %listen_addr, "starting SSH listener");

    let mut ssh_server = GateServer::new(state);
    ssh_server
        .run_on_address(config, listen_addr)
        .await
        .context("SSH server exited with error")?;

    Ok(())
}
