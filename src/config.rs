//! Relay settings
//!
//! Loaded from a TOML file; every field has a default so an absent file or
//! section means "authentication disabled, all actions open".
//!
//! ```toml
//! relay_url = "wss://relay.example.com"
//! bind = "0.0.0.0:6969"
//!
//! [authentication]
//! enabled = true
//!
//! [authentication.actions]
//! save = "w"
//! query = "r"
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_BIND: &str = "0.0.0.0:6969";
pub const DEFAULT_RELAY_URL: &str = "ws://localhost:6969";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Authentication section
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// When false every action is allowed
    #[serde(default)]
    pub enabled: bool,
    /// Action name → role codes; validated when the authenticator is built
    #[serde(default)]
    pub actions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    /// Address clients must name in the `relay` tag
    #[serde(default = "default_relay_url")]
    pub relay_url: String,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub authentication: AuthConfig,
}

fn default_relay_url() -> String {
    DEFAULT_RELAY_URL.to_string()
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            bind: default_bind(),
            database_url: None,
            authentication: AuthConfig::default(),
        }
    }
}

impl Settings {
    pub fn from_toml(s: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents, path)
    }

    /// Load `path` if given, otherwise defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
