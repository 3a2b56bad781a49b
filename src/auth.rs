//! Public-key authentication against the credential store.
//!
//! A connection is accepted when the offered key's wire blob equals, byte
//! for byte, the decoded blob of any key on file for the claimed username.
//! Unknown usernames and key mismatches are indistinguishable to the client;
//! they are logged distinctly server-side.

use base64::Engine as _;
use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::store::RepoStore;

/// Decode one OpenSSH-format public key line (`algorithm base64-blob
/// [comment]`). Blank lines and comments yield `None`.
fn decode_key_line(line: &str) -> Option<PublicKey> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let mut parts = line.split_whitespace();
    let _algorithm = parts.next()?;
    let blob = parts.next()?;
    russh_keys::parse_public_key_base64(blob).ok()
}

/// Decide whether `offered` belongs to `username`.
///
/// This runs once per connection, before any channel exists. The check is an
/// exact byte comparison of decoded key blobs; a stored line that fails to
/// decode is skipped with a warning rather than failing the whole lookup.
pub async fn authenticate(store: &dyn RepoStore, username: &str, offered: &PublicKey) -> bool {
    let Some(lines) = store.authorized_keys(username).await else {
        debug!(user = %username, "unknown username");
        return false;
    };

    let offered_blob = offered.public_key_bytes();
    for line in &lines {
        match decode_key_line(line) {
            Some(stored) if stored.public_key_bytes() == offered_blob => return true,
            Some(_) => {}
            None => {
                warn!(user = %username, "skipping undecodable key line on file");
            }
        }
    }

    debug!(user = %username, keys_on_file = lines.len(), "no matching key");
    false
}

/// SHA-256 fingerprint of a public key in the `SHA256:` base64 form printed
/// by `ssh-keygen -l`.
pub fn fingerprint_of(key: &PublicKey) -> String {
    let hash = Sha256::digest(key.public_key_bytes());
    let encoded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(hash);
    format!("SHA256:{encoded}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::UserRecord;
    use crate::store::MemoryStore;
    use russh_keys::key::KeyPair;

    fn openssh_line(key: &KeyPair) -> String {
        format!("ssh-ed25519 {} test@host", key.public_key_base64())
    }

    fn public_of(key: &KeyPair) -> PublicKey {
        russh_keys::parse_public_key_base64(&key.public_key_base64()).unwrap()
    }

    fn store_with_keys(username: &str, keys: Vec<String>) -> MemoryStore {
        MemoryStore::default().with_user(
            username,
            UserRecord {
                keys,
                repos: Default::default(),
            },
        )
    }

    #[tokio::test]
    async fn accepts_matching_key() {
        let key = KeyPair::generate_ed25519();
        let store = store_with_keys("jane", vec![openssh_line(&key)]);
        assert!(authenticate(&store, "jane", &public_of(&key)).await);
    }

    #[tokio::test]
    async fn accepts_any_key_in_the_stored_set() {
        let first = KeyPair::generate_ed25519();
        let second = KeyPair::generate_ed25519();
        let store = store_with_keys("jane", vec![openssh_line(&first), openssh_line(&second)]);
        assert!(authenticate(&store, "jane", &public_of(&second)).await);
    }

    #[tokio::test]
    async fn rejects_different_key() {
        let stored = KeyPair::generate_ed25519();
        let offered = KeyPair::generate_ed25519();
        let store = store_with_keys("jane", vec![openssh_line(&stored)]);
        assert!(!authenticate(&store, "jane", &public_of(&offered)).await);
    }

    #[tokio::test]
    async fn rejects_unknown_username() {
        let key = KeyPair::generate_ed25519();
        let store = store_with_keys("jane", vec![openssh_line(&key)]);
        assert!(!authenticate(&store, "mallory", &public_of(&key)).await);
    }

    #[tokio::test]
    async fn rejects_known_user_with_empty_key_set() {
        let key = KeyPair::generate_ed25519();
        let store = store_with_keys("jane", vec![]);
        assert!(!authenticate(&store, "jane", &public_of(&key)).await);
    }

    #[tokio::test]
    async fn skips_undecodable_lines_without_failing_the_lookup() {
        let key = KeyPair::generate_ed25519();
        let store = store_with_keys(
            "jane",
            vec!["not a key at all".to_string(), openssh_line(&key)],
        );
        assert!(authenticate(&store, "jane", &public_of(&key)).await);
    }

    #[test]
    fn decode_skips_blanks_and_comments() {
        assert!(decode_key_line("").is_none());
        assert!(decode_key_line("   ").is_none());
        assert!(decode_key_line("# a comment").is_none());
    }

    #[test]
    fn fingerprint_has_sshkeygen_shape() {
        let key = KeyPair::generate_ed25519();
        let fp = fingerprint_of(&public_of(&key));
        assert!(fp.starts_with("SHA256:"));
        // 32 hash bytes → 43 unpadded base64 chars.
        assert_eq!(fp.len(), "SHA256:".len() + 43);
    }
}
