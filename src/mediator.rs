//! Command mediation: the single gate between a client-supplied exec string
//! and the command line handed to the restricted shell.
//!
//! The raw string is tokenized with POSIX shell-word rules. The trailing
//! token is a logical repository name and is resolved through the credential
//! store; everything before it is the git-serving command plus flags. The
//! rebuilt command line carries the resolved physical path as its only path
//! value — an unresolved name never reaches the shell.

use std::borrow::Cow;

use thiserror::Error;
use tracing::debug;

use crate::store::RepoStore;

/// Why an exec request was rejected without spawning anything.
#[derive(Debug, Error)]
pub enum MediateError {
    /// The command string could not be tokenized, or contained no tokens.
    #[error("malformed command")]
    Malformed,
    /// The trailing token did not resolve to a repository for this user.
    ///
    /// Deliberately carries no hint of whether the name exists for anyone
    /// else; the mapping is per-authenticated-username.
    #[error("access denied: {0}")]
    Unauthorized(String),
}

/// Resolve and rebuild one exec command for `username`.
///
/// On success the returned string is the complete command line for
/// `git-shell -c`: the client's command and flags re-joined, followed by the
/// single-quoted physical path.
pub async fn mediate(
    store: &dyn RepoStore,
    username: &str,
    raw: &str,
) -> Result<String, MediateError> {
    let tokens = shell_words::split(raw).map_err(|_| MediateError::Malformed)?;
    let Some((logical, prefix)) = tokens.split_last() else {
        return Err(MediateError::Malformed);
    };

    let path = store
        .resolve_repo_path(username, logical)
        .await
        .ok_or_else(|| MediateError::Unauthorized(logical.clone()))?;

    debug!(
        user = %username,
        logical = %logical,
        path = %path.display(),
        "resolved repository",
    );

    let quoted = quote_path(&path.to_string_lossy());
    let prefix = shell_words::join(prefix);
    if prefix.is_empty() {
        Ok(quoted)
    } else {
        Ok(format!("{prefix} {quoted}"))
    }
}

/// Enclose `path` in single quotes unconditionally, so it stays one shell
/// word through the restricted shell's own parse no matter what characters
/// it contains. Embedded single quotes become `'\''`.
fn quote_path(path: &str) -> String {
    let escaped: Cow<'_, str> = if path.contains('\'') {
        Cow::Owned(path.replace('\'', r"'\''"))
    } else {
        Cow::Borrowed(path)
    };
    format!("'{escaped}'")
}
