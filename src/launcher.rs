//! Restricted-shell discovery and child-process plumbing.
//!
//! The gateway spawns exactly one process per accepted exec request:
//! `git-shell -c <mediated command>`. The child's stdio is bridged to the
//! SSH channel by a background pump task; dropping that task kills the
//! child, so a channel that goes away never leaves a process behind.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use russh::server::Handle;
use russh::{ChannelId, CryptoVec};
use tokio::io::AsyncReadExt;
use tokio::process::{ChildStdin, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Name of the restricted shell searched for on `PATH`.
pub const GIT_SHELL: &str = "git-shell";

// ---------------------------------------------------------------------------
// Shell discovery
// ---------------------------------------------------------------------------

/// Locate the restricted shell executable.
///
/// An explicit configured path is validated and used as-is; otherwise each
/// `PATH` entry is searched for `git-shell`. Failure here is a startup
/// error: the server must not accept connections it cannot serve.
pub fn find_git_shell(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if !is_executable(path) {
            bail!(
                "configured shell {} is not an executable file",
                path.display(),
            );
        }
        return Ok(path.to_path_buf());
    }

    let path_var = std::env::var_os("PATH").unwrap_or_default();
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(GIT_SHELL);
        if is_executable(&candidate) {
            return Ok(candidate);
        }
    }

    bail!("could not find `{GIT_SHELL}` on PATH")
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Spawn and pipe
// ---------------------------------------------------------------------------

/// Handles held by the session for a running child.
pub struct ChildBridge {
    /// Child stdin; data from the SSH client is forwarded here, and
    /// dropping it signals EOF to the child.
    pub stdin: ChildStdin,
    /// The pump task. Aborting it drops the `Child`, which kills the
    /// process (`kill_on_drop`).
    pub pump: JoinHandle<()>,
}

/// Spawn `shell -c command` and bridge its stdio to the SSH channel.
///
/// The child starts with a cleared environment apart from `PATH` (so the
/// restricted shell can locate the git helpers) and the client's negotiated
/// `GIT_PROTOCOL`, if any. stdout streams to channel data, stderr to
/// extended data 1; when the child exits the channel is finished with
/// exit-status, EOF, and close, in the order required by RFC 4254.
pub fn spawn_shell(
    shell: &Path,
    command: &str,
    git_protocol: Option<&str>,
    channel_id: ChannelId,
    handle: Handle,
) -> Result<ChildBridge> {
    let mut cmd = Command::new(shell);
    cmd.arg("-c").arg(command);

    cmd.env_clear();
    cmd.env("PATH", std::env::var_os("PATH").unwrap_or_default());
    if let Some(proto) = git_protocol {
        cmd.env("GIT_PROTOCOL", proto);
    }

    cmd.kill_on_drop(true)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn {}", shell.display()))?;

    info!(pid = child.id(), command = %command, "child spawned");

    let stdin = child.stdin.take().context("child stdin was not piped")?;
    let mut stdout = child.stdout.take().context("child stdout was not piped")?;
    let mut stderr = child.stderr.take().context("child stderr was not piped")?;

    let pump = tokio::spawn(async move {
        let mut out_buf = vec![0u8; 65536];
        let mut err_buf = vec![0u8; 8192];
        let mut out_done = false;
        let mut err_done = false;

        while !(out_done && err_done) {
            tokio::select! {
                read = stdout.read(&mut out_buf), if !out_done => match read {
                    Ok(0) => out_done = true,
                    Ok(n) => {
                        if handle
                            .data(channel_id, CryptoVec::from_slice(&out_buf[..n]))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "error reading child stdout");
                        out_done = true;
                    }
                },
                read = stderr.read(&mut err_buf), if !err_done => match read {
                    Ok(0) => err_done = true,
                    Ok(n) => {
                        let _ = handle
                            .extended_data(channel_id, 1, CryptoVec::from_slice(&err_buf[..n]))
                            .await;
                    }
                    Err(_) => err_done = true,
                },
            }
        }

        let exit_code = match child.wait().await {
            Ok(status) => status.code().unwrap_or(1) as u32,
            Err(_) => 1,
        };
        info!(exit_code, "child exited");

        // RFC 4254: exit-status → EOF → close.
        let _ = handle.exit_status_request(channel_id, exit_code).await;
        let _ = handle.eof(channel_id).await;
        let _ = handle.close(channel_id).await;
    });

    Ok(ChildBridge { stdin, pump })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn explicit_shell_must_be_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();

        let plain = dir.path().join("not-executable");
        std::fs::File::create(&plain)
            .unwrap()
            .write_all(b"#!/bin/sh\n")
            .unwrap();
        assert!(find_git_shell(Some(&plain)).is_err());

        let shell = dir.path().join("fake-git-shell");
        std::fs::File::create(&shell)
            .unwrap()
            .write_all(b"#!/bin/sh\n")
            .unwrap();
        std::fs::set_permissions(&shell, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(find_git_shell(Some(&shell)).unwrap(), shell);
    }

    #[test]
    fn missing_explicit_shell_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_git_shell(Some(&dir.path().join("absent"))).is_err());
    }

    #[test]
    fn directory_is_not_an_executable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_executable(dir.path()));
    }
}
