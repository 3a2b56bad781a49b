//! SSH session handler implementing the `russh` [`Handler`] trait.
//!
//! Each inbound connection is served by a dedicated [`SshSession`]. The
//! handler performs public-key authentication against the credential store,
//! binds the authenticated username to the session, and services at most
//! one exec request: the command is mediated (trailing token resolved to a
//! provisioned repository path) and handed to the restricted shell, whose
//! stdio is bridged back through the channel. Shell requests are refused;
//! the gateway never grants an interactive shell.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec};
use russh_keys::key::PublicKey;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::mediator::{self, MediateError};
use crate::{auth, launcher, AppState};

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Per-connection session state.
///
/// `username` is set exactly once, on successful authentication, and never
/// re-resolved afterwards. `exec_used` enforces the one-command-per-session
/// contract.
pub struct SshSession {
    state: Arc<AppState>,
    peer_addr: Option<SocketAddr>,
    username: Option<String>,
    /// `GIT_PROTOCOL` value sent by the client via SSH env request.
    git_protocol: Option<String>,
    /// Stdin handle for the running child; client data is forwarded here.
    child_stdin: Option<ChildStdin>,
    /// Pump task bridging child stdio to the channel. Aborting it kills
    /// the child.
    pump: Option<JoinHandle<()>>,
    exec_used: bool,
}

impl SshSession {
    /// Create a new session for an incoming connection.
    pub fn new(state: Arc<AppState>, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            state,
            peer_addr,
            username: None,
            git_protocol: None,
            child_stdin: None,
            pump: None,
            exec_used: false,
        }
    }

    fn abort_child(&mut self) {
        self.child_stdin.take();
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

impl Drop for SshSession {
    // A connection torn down without an orderly channel close must not
    // leave the child running.
    fn drop(&mut self) {
        self.abort_child();
    }
}

// ---------------------------------------------------------------------------
// Channel close helper
// ---------------------------------------------------------------------------

/// Send exit-status, EOF, and close on a channel in the order required by
/// the SSH protocol (RFC 4254). Git's SSH transport expects all three;
/// omitting exit-status or EOF makes the client report "the remote end hung
/// up unexpectedly".
fn finish_channel(session: &mut Session, channel_id: ChannelId, exit_status: u32) {
    session.exit_status_request(channel_id, exit_status);
    session.eof(channel_id);
    session.close(channel_id);
}

fn reject_exec(session: &mut Session, channel_id: ChannelId, notice: &str) {
    session.extended_data(channel_id, 1, CryptoVec::from_slice(notice.as_bytes()));
    finish_channel(session, channel_id, 1);
}

// ---------------------------------------------------------------------------
// Handler implementation
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl Handler for SshSession {
    type Error = anyhow::Error;

    /// Authenticate a client by public key against the credential store.
    ///
    /// Rejection is generic to the client whether the username is unknown
    /// or the key mismatches; the store lookup logs the two cases apart.
    async fn auth_publickey(&mut self, user: &str, key: &PublicKey) -> Result<Auth, Self::Error> {
        let fp = auth::fingerprint_of(key);
        info!(
            peer = ?self.peer_addr,
            user = %user,
            fingerprint = %fp,
            "SSH public-key auth attempt",
        );

        if auth::authenticate(self.state.store.as_ref(), user, key).await {
            info!(user = %user, fingerprint = %fp, "authentication succeeded");
            self.username = Some(user.to_string());
            Ok(Auth::Accept)
        } else {
            warn!(user = %user, fingerprint = %fp, "authentication failed");
            Ok(Auth::Reject {
                proceed_with_methods: None,
            })
        }
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    /// Capture environment variables sent before the exec request. Only
    /// `GIT_PROTOCOL` is honored; git clients send it to negotiate protocol
    /// v2 with `upload-pack`.
    async fn env_request(
        &mut self,
        _channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if variable_name == "GIT_PROTOCOL" {
            debug!(value = %variable_value, "captured GIT_PROTOCOL from client");
            self.git_protocol = Some(variable_value.to_string());
        }
        Ok(())
    }

    /// Forward data received from the client to the child's stdin.
    async fn data(
        &mut self,
        _channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(ref mut stdin) = self.child_stdin {
            if let Err(e) = stdin.write_all(data).await {
                debug!(error = %e, "failed to write to child stdin (process may have exited)");
                self.child_stdin.take();
            }
        }
        Ok(())
    }

    /// Client EOF closes the child's stdin so it knows input is complete.
    async fn channel_eof(
        &mut self,
        _channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        // Dropping the ChildStdin closes the pipe.
        self.child_stdin.take();
        Ok(())
    }

    /// A closed channel must not leave the child running.
    async fn channel_close(
        &mut self,
        _channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.abort_child();
        Ok(())
    }

    /// The gateway serves git commands only; there is no interactive shell.
    async fn shell_request(
        &mut self,
        channel_id: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        warn!(user = ?self.username, "shell request refused");
        session.channel_failure(channel_id);
        Ok(())
    }

    /// Handle the exec request on an established channel.
    ///
    /// The command is mediated before anything is spawned: tokenize, resolve
    /// the trailing repository name for the bound username, rebuild with the
    /// provisioned path. Any failure rejects the request with a notice on
    /// stderr and spawns nothing.
    async fn exec_request(
        &mut self,
        channel_id: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.exec_used {
            warn!(
                user = ?self.username,
                "second exec request on one session; rejecting",
            );
            session.channel_failure(channel_id);
            return Ok(());
        }
        self.exec_used = true;

        // Authentication strictly precedes channel creation, so a bound
        // username is an invariant here.
        let Some(username) = self.username.clone() else {
            error!("exec request without an authenticated user");
            session.channel_failure(channel_id);
            return Ok(());
        };

        let raw = String::from_utf8_lossy(data);
        info!(
            peer = ?self.peer_addr,
            user = %username,
            command = %raw,
            "SSH exec request",
        );

        let command = match mediator::mediate(self.state.store.as_ref(), &username, &raw).await {
            Ok(command) => command,
            Err(MediateError::Malformed) => {
                warn!(user = %username, command = %raw, "malformed exec command");
                reject_exec(session, channel_id, "ERROR: malformed command.\n");
                return Ok(());
            }
            Err(MediateError::Unauthorized(logical)) => {
                warn!(user = %username, logical = %logical, "repository access denied");
                reject_exec(
                    session,
                    channel_id,
                    &format!("ERROR: access denied: {logical}\n"),
                );
                return Ok(());
            }
        };

        match launcher::spawn_shell(
            &self.state.shell,
            &command,
            self.git_protocol.as_deref(),
            channel_id,
            session.handle(),
        ) {
            Ok(bridge) => {
                self.child_stdin = Some(bridge.stdin);
                self.pump = Some(bridge.pump);
            }
            Err(e) => {
                error!(user = %username, error = %e, "failed to spawn restricted shell");
                reject_exec(session, channel_id, "ERROR: failed to start git command.\n");
            }
        }

        Ok(())
    }
}
