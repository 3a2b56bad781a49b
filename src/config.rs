use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Gateway configuration, loaded from an optional YAML file. Every field is
/// defaulted, so the server runs with no config file at all.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Socket address for the SSH listener.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Explicit path to the restricted shell. When unset, `git-shell` is
    /// searched for on `PATH` at startup.
    #[serde(default)]
    pub shell: Option<PathBuf>,
    /// YAML users file (username → keys + repositories). When unset the
    /// store is empty and every connection is rejected.
    #[serde(default)]
    pub users_file: Option<PathBuf>,
    /// Idle-connection timeout in seconds.
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_secs: u64,
    /// Authentication attempts allowed per connection.
    #[serde(default = "default_max_auth_attempts")]
    pub max_auth_attempts: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            shell: None,
            users_file: None,
            inactivity_timeout_secs: default_inactivity_timeout(),
            max_auth_attempts: default_max_auth_attempts(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:2222".to_string()
}

fn default_inactivity_timeout() -> u64 {
    600
}

fn default_max_auth_attempts() -> usize {
    3
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load a [`Config`] from a YAML file, or the defaults when no path is
/// given.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&contents)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?
        }
        None => Config::default(),
    };
    validate_config(&config)?;
    Ok(config)
}

/// Sanity checks that cannot be expressed with serde alone.
fn validate_config(config: &Config) -> Result<()> {
    config
        .listen
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid listen address: {:?}", config.listen))?;
    anyhow::ensure!(
        config.inactivity_timeout_secs > 0,
        "inactivity_timeout_secs must be positive"
    );
    anyhow::ensure!(
        config.max_auth_attempts > 0,
        "max_auth_attempts must be positive"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.listen, "0.0.0.0:2222");
    }

    #[test]
    fn parses_partial_yaml_with_defaults() {
        let config: Config = serde_yaml::from_str("listen: \"127.0.0.1:2022\"\n").unwrap();
        assert_eq!(config.listen, "127.0.0.1:2022");
        assert_eq!(config.inactivity_timeout_secs, 600);
        assert!(config.users_file.is_none());
    }

    #[test]
    fn rejects_unparseable_listen_address() {
        let config = Config {
            listen: "not-an-address".to_string(),
            ..Config::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_zero_auth_attempts() {
        let config = Config {
            max_auth_attempts: 0,
            ..Config::default()
        };
        assert!(validate_config(&config).is_err());
    }
}
