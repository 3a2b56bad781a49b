//! Credential store: the pluggable source of authorized keys and repository
//! mappings.
//!
//! The gateway core depends only on the two read operations of [`RepoStore`];
//! the backing (in-memory map, database, ...) is an implementation detail
//! behind the trait. Entries are provisioned out of band and are read-only
//! from the gateway's perspective.

use std::path::PathBuf;

use async_trait::async_trait;

pub mod memory;

pub use memory::MemoryStore;

/// Read interface consumed by authentication and command mediation.
///
/// Implementations are shared across sessions behind an `Arc` and must be
/// safe for concurrent reads.
#[async_trait]
pub trait RepoStore: Send + Sync {
    /// Map a logical repository name owned by `username` to its on-disk
    /// location.
    ///
    /// Returns `None` when the username is unknown or owns no repository
    /// under that name. The returned path is always taken from provisioned
    /// data, never derived from client input.
    async fn resolve_repo_path(&self, username: &str, logical: &str) -> Option<PathBuf>;

    /// All OpenSSH-format public key lines authorized for `username`.
    ///
    /// Returns `None` when the username is unknown, as opposed to
    /// `Some(vec![])` for a known user with no keys on file. Both reject
    /// authentication; the distinction only matters for server-side logs.
    async fn authorized_keys(&self, username: &str) -> Option<Vec<String>>;
}
