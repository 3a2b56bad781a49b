//! In-memory [`RepoStore`] backed by a `HashMap`, loadable from a YAML
//! users file.
//!
//! The file maps each username to its authorized key lines and its logical
//! name → physical path repository table:
//!
//! ```yaml
//! jane:
//!   keys:
//!     - "ssh-ed25519 AAAA... jane@laptop"
//!   repos:
//!     "/foobar.git": /srv/git/foobar.git
//!     "/project.git": /srv/git/project.git
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::RepoStore;

/// Per-user provisioning record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserRecord {
    /// OpenSSH-format public key lines (`ssh-ed25519 AAAA... comment`).
    #[serde(default)]
    pub keys: Vec<String>,
    /// Logical repository name → physical path.
    #[serde(default)]
    pub repos: HashMap<String, PathBuf>,
}

/// Map-backed store for development, tests, and file-provisioned
/// deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: HashMap<String, UserRecord>,
}

impl MemoryStore {
    /// Load a store from a YAML users file at `path`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read users file: {}", path.display()))?;
        Self::from_yaml(&contents)
            .with_context(|| format!("failed to parse users file: {}", path.display()))
    }

    /// Parse a store from YAML text.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let users: HashMap<String, UserRecord> = serde_yaml::from_str(contents)?;
        Ok(Self { users })
    }

    /// Add a user record, replacing any existing one for the same name.
    #[cfg(test)]
    pub fn with_user(mut self, username: impl Into<String>, record: UserRecord) -> Self {
        self.users.insert(username.into(), record);
        self
    }

    /// Number of provisioned users.
    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

#[async_trait]
impl RepoStore for MemoryStore {
    async fn resolve_repo_path(&self, username: &str, logical: &str) -> Option<PathBuf> {
        self.users.get(username)?.repos.get(logical).cloned()
    }

    async fn authorized_keys(&self, username: &str) -> Option<Vec<String>> {
        self.users.get(username).map(|user| user.keys.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jane() -> UserRecord {
        UserRecord {
            keys: vec!["ssh-ed25519 AAAAfake jane@laptop".to_string()],
            repos: HashMap::from([(
                "/foobar.git".to_string(),
                PathBuf::from("/srv/git/foobar.git"),
            )]),
        }
    }

    #[tokio::test]
    async fn resolves_mapped_repo() {
        let store = MemoryStore::default().with_user("jane", jane());
        assert_eq!(
            store.resolve_repo_path("jane", "/foobar.git").await,
            Some(PathBuf::from("/srv/git/foobar.git")),
        );
    }

    #[tokio::test]
    async fn unknown_user_resolves_nothing() {
        let store = MemoryStore::default().with_user("jane", jane());
        assert_eq!(store.resolve_repo_path("mallory", "/foobar.git").await, None);
        assert_eq!(store.authorized_keys("mallory").await, None);
    }

    #[tokio::test]
    async fn unmapped_name_resolves_nothing() {
        let store = MemoryStore::default().with_user("jane", jane());
        assert_eq!(store.resolve_repo_path("jane", "/other.git").await, None);
    }

    #[tokio::test]
    async fn known_user_with_no_keys_is_distinguishable_from_unknown() {
        let store = MemoryStore::default().with_user("keyless", UserRecord::default());
        assert_eq!(store.authorized_keys("keyless").await, Some(vec![]));
        assert_eq!(store.authorized_keys("nobody").await, None);
    }

    #[tokio::test]
    async fn parses_users_file_shape() {
        let yaml = r#"
jane:
  keys:
    - "ssh-ed25519 AAAAfake jane@laptop"
  repos:
    "/foobar.git": /srv/git/foobar.git
    "/project.git": /srv/git/project.git
john:
  keys: []
  repos:
    "/helloworld.git": /srv/git/helloworld.git
"#;
        let store = MemoryStore::from_yaml(yaml).unwrap();
        assert_eq!(store.user_count(), 2);
        assert_eq!(
            store.resolve_repo_path("jane", "/project.git").await,
            Some(PathBuf::from("/srv/git/project.git")),
        );
        assert_eq!(
            store.resolve_repo_path("john", "/helloworld.git").await,
            Some(PathBuf::from("/srv/git/helloworld.git")),
        );
    }

    #[test]
    fn rejects_malformed_users_file() {
        assert!(MemoryStore::from_yaml("jane: [not, a, record]").is_err());
    }
}
