//! TOML settings file for the `graceful-serve` binary.
//!
//! Every field has a serde default, so an empty file (or no file at all) is a
//! valid configuration:
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0"
//! port = 8080
//! drain_timeout_secs = 10
//! handshake_timeout_secs = 10
//! max_connections = 512
//! body = "Foobar"
//!
//! [tls]
//! cert = "/etc/graceful/server.pem"
//! key = "/etc/graceful/server.key"
//! ```
//!
//! The `[tls]` table is optional; when absent the binary serves plain TCP.
//! Command-line flags override values read from the file.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::config::{ServerConfig, DEFAULT_PORT};

/// Error type for settings file operations.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The file could not be read.
    #[error("I/O error reading settings at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse settings TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── Settings schema ───────────────────────────────────────────────────────────

/// Top-level settings document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub tls: Option<TlsSection>,
}

/// `[server]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Grace period given to open connections on Ctrl+C.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,

    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,

    #[serde(default)]
    pub max_connections: Option<usize>,

    /// Response body served to every client.
    #[serde(default = "default_body")]
    pub body: String,
}

/// `[tls]` table.  Both paths are required when the table is present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TlsSection {
    pub cert: PathBuf,
    pub key: PathBuf,
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_drain_timeout_secs() -> u64 {
    10
}

fn default_handshake_timeout_secs() -> u64 {
    10
}

fn default_body() -> String {
    "Foobar".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            drain_timeout_secs: default_drain_timeout_secs(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            max_connections: None,
            body: default_body(),
        }
    }
}

impl Settings {
    /// Reads and parses a settings file.
    ///
    /// # Errors
    ///
    /// [`SettingsError::Io`] if the file cannot be read,
    /// [`SettingsError::Parse`] if it is not valid TOML for this schema.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Parses settings from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(text)?)
    }

    /// Library configuration described by the `[server]` table.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: SocketAddr::new(self.server.bind, self.server.port),
            handshake_timeout: Duration::from_secs(self.server.handshake_timeout_secs),
            max_connections: self.server.max_connections,
        }
    }

    /// Grace period used when the binary is interrupted.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.server.drain_timeout_secs)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
