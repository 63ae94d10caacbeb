//! TLS wrapping for listeners.
//!
//! Two ways in, one listener type out:
//!
//! - [`bind_tls_from_files`] loads a PEM certificate chain and private key
//!   and builds a default `rustls::ServerConfig` (no client auth).
//! - [`bind_tls_from_config`] takes a caller-built `rustls::ServerConfig`
//!   and uses it verbatim: client-certificate verifiers, SNI resolvers, ALPN
//!   and cipher choices are the caller's responsibility and are not checked
//!   here.
//!
//! # Handshakes off the accept path
//!
//! A TLS handshake takes at least one round trip and a slow or malicious
//! client can stall it indefinitely.  [`TlsListener`] therefore runs each
//! handshake in its own task (bounded by a timeout) and only yields
//! connections whose handshake completed.  Failed handshakes are logged and
//! dropped; they never count as accept errors and never reach the handler.

use std::fs::File;
use std::io::{self, BufReader};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

use super::listener::Listener;

/// Certificate or key material could not be loaded or was rejected.
#[derive(Debug, Error)]
pub enum CertError {
    /// A PEM file could not be opened or read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The certificate file contained no `CERTIFICATE` blocks.
    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    /// The key file contained no PKCS#8, PKCS#1 or SEC1 private key.
    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    /// rustls refused the certificate/key pair (mismatch, unsupported
    /// algorithm).
    #[error("certificate rejected: {0}")]
    Rejected(#[from] rustls::Error),
}

/// A listener whose accepted connections have completed a TLS handshake.
pub struct TlsListener<L: Listener> {
    inner: L,
    acceptor: TlsAcceptor,
    handshake_timeout: Duration,
    handshakes: JoinSet<Option<(TlsStream<L::Io>, SocketAddr)>>,
}

impl<L: Listener> TlsListener<L> {
    /// Wraps `inner` with the given server configuration.
    pub fn new(inner: L, config: Arc<rustls::ServerConfig>, handshake_timeout: Duration) -> Self {
        Self {
            inner,
            acceptor: TlsAcceptor::from(config),
            handshake_timeout,
            handshakes: JoinSet::new(),
        }
    }

    /// The configuration handed to rustls for every handshake.
    pub fn config(&self) -> &Arc<rustls::ServerConfig> {
        self.acceptor.config()
    }

    fn start_handshake(&mut self, io: L::Io, peer: SocketAddr) {
        let acceptor = self.acceptor.clone();
        let limit = self.handshake_timeout;
        self.handshakes.spawn(async move {
            match tokio::time::timeout(limit, acceptor.accept(io)).await {
                Ok(Ok(stream)) => Some((stream, peer)),
                Ok(Err(e)) => {
                    debug!(%peer, "TLS handshake failed: {e}");
                    None
                }
                Err(_) => {
                    debug!(%peer, ?limit, "TLS handshake timed out");
                    None
                }
            }
        });
    }
}

#[async_trait]
impl<L: Listener> Listener for TlsListener<L> {
    type Io = TlsStream<L::Io>;

    /// Cancel-safe: both raced futures are cancel-safe and a completed
    /// handshake stays in the join set until it is returned.
    async fn accept(&mut self) -> io::Result<(Self::Io, SocketAddr)> {
        loop {
            tokio::select! {
                accepted = self.inner.accept() => {
                    let (io, peer) = accepted?;
                    self.start_handshake(io, peer);
                }
                Some(done) = self.handshakes.join_next(), if !self.handshakes.is_empty() => {
                    if let Ok(Some(conn)) = done {
                        return Ok(conn);
                    }
                }
            }
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

/// Wraps `listener` with TLS using PEM files on disk.
///
/// # Errors
///
/// Returns [`CertError`] if either file is missing, unreadable, empty of the
/// expected PEM blocks, or if the key does not match the certificate.
pub fn bind_tls_from_files<L: Listener>(
    listener: L,
    cert_path: impl AsRef<Path>,
    key_path: impl AsRef<Path>,
    handshake_timeout: Duration,
) -> Result<TlsListener<L>, CertError> {
    let config = load_server_config(cert_path.as_ref(), key_path.as_ref())?;
    Ok(TlsListener::new(listener, Arc::new(config), handshake_timeout))
}

/// Wraps `listener` with TLS using a caller-supplied configuration, passed
/// through unchanged.
pub fn bind_tls_from_config<L: Listener>(
    listener: L,
    config: Arc<rustls::ServerConfig>,
    handshake_timeout: Duration,
) -> TlsListener<L> {
    TlsListener::new(listener, config, handshake_timeout)
}

/// Builds a server configuration (ring provider, safe default protocol
/// versions, no client auth) from PEM files.
///
/// # Errors
///
/// See [`bind_tls_from_files`].
pub fn load_server_config(cert_path: &Path, key_path: &Path) -> Result<rustls::ServerConfig, CertError> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_no_client_auth()
    .with_single_cert(certs, key)?;

    info!(
        cert = %cert_path.display(),
        key = %key_path.display(),
        "loaded TLS certificate"
    );
    Ok(config)
}

fn open_pem(path: &Path) -> Result<BufReader<File>, CertError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| CertError::Read {
            path: path.to_path_buf(),
            source,
        })
}

/// Reads every `CERTIFICATE` block, leaf first.
fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, CertError> {
    let mut reader = open_pem(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| CertError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    if certs.is_empty() {
        return Err(CertError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

/// Reads the first private key block of any supported encoding.
fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, CertError> {
    let mut reader = open_pem(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| CertError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| CertError::NoPrivateKey(path.to_path_buf()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
