//! graceful-serve: a fixed-response TCP/TLS server with graceful shutdown.
//!
//! Every client receives the same small HTTP response.  On Ctrl+C the server
//! stops accepting, waits up to the drain timeout for open connections to
//! finish, then force-closes whatever is left and exits.
//!
//! # Usage
//!
//! ```text
//! graceful-serve [OPTIONS]
//!
//! Options:
//!   --port           <PORT>  Listen port [default: 8080]
//!   --bind           <IP>    Listen address [default: 0.0.0.0]
//!   --config         <PATH>  TOML settings file
//!   --tls-cert       <PATH>  PEM certificate chain (enables TLS)
//!   --tls-key        <PATH>  PEM private key (enables TLS)
//!   --drain-timeout  <SECS>  Grace period on Ctrl+C [default: 10]
//!   --body           <TEXT>  Response body [default: Foobar]
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                 | Flag              |
//! |--------------------------|-------------------|
//! | `GRACEFUL_PORT`          | `--port`          |
//! | `GRACEFUL_BIND`          | `--bind`          |
//! | `GRACEFUL_CONFIG`        | `--config`        |
//! | `GRACEFUL_TLS_CERT`      | `--tls-cert`      |
//! | `GRACEFUL_TLS_KEY`       | `--tls-key`       |
//! | `GRACEFUL_DRAIN_TIMEOUT` | `--drain-timeout` |
//! | `GRACEFUL_BODY`          | `--body`          |
//!
//! Precedence: flag, then environment variable, then settings file, then
//! built-in default.  The log level is controlled by `RUST_LOG`.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use graceful_server::infrastructure::settings::{Settings, TlsSection};
use graceful_server::{FixedResponse, GracefulServer};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Fixed-response server with bounded graceful shutdown.
///
/// Options left unset fall back to the settings file, then to defaults, so
/// none of them carry a clap `default_value`.
#[derive(Debug, Parser)]
#[command(
    name = "graceful-serve",
    about = "Fixed-response TCP/TLS server with bounded graceful shutdown",
    version
)]
struct Cli {
    /// TCP port to listen on.
    #[arg(long, env = "GRACEFUL_PORT")]
    port: Option<u16>,

    /// IP address to bind.
    #[arg(long, env = "GRACEFUL_BIND")]
    bind: Option<IpAddr>,

    /// Path to a TOML settings file.
    #[arg(long, env = "GRACEFUL_CONFIG")]
    config: Option<PathBuf>,

    /// PEM certificate chain; requires `--tls-key`.
    #[arg(long, env = "GRACEFUL_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key; requires `--tls-cert`.
    #[arg(long, env = "GRACEFUL_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Seconds open connections get to finish after Ctrl+C.
    #[arg(long, env = "GRACEFUL_DRAIN_TIMEOUT")]
    drain_timeout: Option<u64>,

    /// Response body sent to every client.
    #[arg(long, env = "GRACEFUL_BODY")]
    body: Option<String>,
}

impl Cli {
    /// Loads the settings file (if any) and applies the CLI overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if `--config` names a file that cannot be read or
    /// parsed.
    fn into_settings(self) -> anyhow::Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load(path)
                .with_context(|| format!("loading settings from {}", path.display()))?,
            None => Settings::default(),
        };

        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(bind) = self.bind {
            settings.server.bind = bind;
        }
        if let Some(secs) = self.drain_timeout {
            settings.server.drain_timeout_secs = secs;
        }
        if let Some(body) = self.body {
            settings.server.body = body;
        }
        if let (Some(cert), Some(key)) = (self.tls_cert, self.tls_key) {
            settings.tls = Some(TlsSection { cert, key });
        }
        Ok(settings)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Cli::parse().into_settings()?;
    let drain = settings.drain_timeout();
    let config = settings.server_config();

    info!(
        addr = %config.bind_addr,
        tls = settings.tls.is_some(),
        ?drain,
        "graceful-serve starting"
    );

    let server = Arc::new(GracefulServer::with_config(
        config,
        FixedResponse::new(settings.server.body.clone()),
    ));

    let stopper = Arc::clone(&server);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, stopping");
                stopper.stop(drain);
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    let result = match &settings.tls {
        Some(tls) => server.listen_and_serve_tls(&tls.cert, &tls.key).await,
        None => server.listen_and_serve().await,
    };

    // A requested stop always ends in Ok, so any error is a real failure.
    result.context("server failed")?;

    info!("graceful-serve stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use graceful_server::domain::config::DEFAULT_PORT;

    #[test]
    fn test_cli_defaults_produce_default_settings() {
        // Arrange: parse with no arguments
        let cli = Cli::parse_from(["graceful-serve"]);

        // Act
        let settings = cli.into_settings().unwrap();

        // Assert
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.server_config().bind_addr.port(), DEFAULT_PORT);
    }

    #[test]
    fn test_cli_port_override() {
        let cli = Cli::parse_from(["graceful-serve", "--port", "1337"]);
        let settings = cli.into_settings().unwrap();
        assert_eq!(settings.server.port, 1337);
    }

    #[test]
    fn test_cli_bind_override() {
        let cli = Cli::parse_from(["graceful-serve", "--bind", "127.0.0.1"]);
        let config = cli.into_settings().unwrap().server_config();
        assert_eq!(config.bind_addr.ip().to_string(), "127.0.0.1");
    }

    #[test]
    fn test_cli_invalid_bind_is_rejected() {
        let result = Cli::try_parse_from(["graceful-serve", "--bind", "not.an.ip"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_drain_timeout_and_body() {
        let cli = Cli::parse_from(["graceful-serve", "--drain-timeout", "3", "--body", "Foo bar"]);
        let settings = cli.into_settings().unwrap();
        assert_eq!(settings.drain_timeout(), Duration::from_secs(3));
        assert_eq!(settings.server.body, "Foo bar");
    }

    #[test]
    fn test_cli_tls_pair_enables_tls() {
        let cli = Cli::parse_from([
            "graceful-serve",
            "--tls-cert",
            "server.pem",
            "--tls-key",
            "server.key",
        ]);
        let tls = cli.into_settings().unwrap().tls.unwrap();
        assert_eq!(tls.cert, PathBuf::from("server.pem"));
        assert_eq!(tls.key, PathBuf::from("server.key"));
    }

    #[test]
    fn test_cli_tls_cert_without_key_is_rejected() {
        let result = Cli::try_parse_from(["graceful-serve", "--tls-cert", "server.pem"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_overrides_settings_file() {
        // Arrange: a file that sets port and body
        let path = std::env::temp_dir().join(format!("graceful-cli-{}.toml", std::process::id()));
        std::fs::write(&path, "[server]\nport = 9000\nbody = \"from file\"\n").unwrap();

        // Act: override only the port
        let cli = Cli::parse_from([
            "graceful-serve",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "9001",
        ]);
        let settings = cli.into_settings().unwrap();

        // Assert
        assert_eq!(settings.server.port, 9001);
        assert_eq!(settings.server.body, "from file");
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_missing_settings_file_is_error() {
        let cli = Cli::parse_from(["graceful-serve", "--config", "/nonexistent/graceful.toml"]);
        assert!(cli.into_settings().is_err());
    }
}
