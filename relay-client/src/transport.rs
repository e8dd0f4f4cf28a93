//! Client side of the secure channel.
//!
//! The server certificate must chain to one configured issuer and carry a
//! DNS or IP subject alternative name matching the host being dialled.
//! Above this layer only byte-stream semantics exist.

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::RootCertStore;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpSocket, TcpStream};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The issuer certificate could not be read.
    #[error("failed to read trust anchor {path}: {source}")]
    ReadAnchor {
        /// Path to the issuer certificate.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The issuer certificate could not be used.
    #[error("invalid trust anchor: {0}")]
    InvalidAnchor(String),

    /// The host is neither a DNS name nor an IP address.
    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    /// TCP connection failed.
    #[error("connection to {address} failed: {source}")]
    Connect {
        /// The address being dialled.
        address: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// TLS handshake failed (untrusted issuer, name mismatch, protocol error).
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] std::io::Error),
}

/// The certificate that issued the server's certificate.
#[derive(Debug, Clone)]
pub enum TrustAnchor {
    /// PEM file on disk.
    File(PathBuf),
    /// PEM contents in memory.
    Pem(Vec<u8>),
}

impl TrustAnchor {
    /// Anchor read from a PEM file.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    /// Anchor from in-memory PEM.
    pub fn from_pem(pem: impl Into<Vec<u8>>) -> Self {
        Self::Pem(pem.into())
    }

    /// Build a connector that trusts only this anchor.
    pub fn connector(&self) -> Result<TlsConnector, TransportError> {
        let pem = match self {
            Self::File(path) => read_pem(path)?,
            Self::Pem(pem) => pem.clone(),
        };

        let mut roots = RootCertStore::empty();
        for cert in parse_certs(&pem)? {
            roots
                .add(cert)
                .map_err(|e| TransportError::InvalidAnchor(e.to_string()))?;
        }

        let config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::InvalidAnchor(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();

        Ok(TlsConnector::from(Arc::new(config)))
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, TransportError> {
    std::fs::read(path).map_err(|source| TransportError::ReadAnchor {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let mut reader = pem;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransportError::InvalidAnchor(e.to_string()))?;
    if certs.is_empty() {
        return Err(TransportError::InvalidAnchor(
            "no certificate found in PEM input".into(),
        ));
    }
    Ok(certs)
}

/// Open a TCP connection to `host:port` and run the TLS handshake over it.
///
/// With `bind` set, the local end is bound to that address first.
pub async fn connect_tls(
    host: &str,
    port: u16,
    anchor: &TrustAnchor,
    bind: Option<SocketAddr>,
) -> Result<TlsStream<TcpStream>, TransportError> {
    let connector = anchor.connector()?;
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| TransportError::InvalidServerName(host.to_string()))?;

    let tcp = connect_tcp(host, port, bind).await?;
    tracing::debug!("TCP connected to {}:{}, starting TLS", host, port);

    connector
        .connect(server_name, tcp)
        .await
        .map_err(TransportError::Handshake)
}

async fn connect_tcp(
    host: &str,
    port: u16,
    bind: Option<SocketAddr>,
) -> Result<TcpStream, TransportError> {
    let address = format!("{host}:{port}");
    let connect_err = |source: std::io::Error| TransportError::Connect {
        address: address.clone(),
        source,
    };

    let mut last_err = None;
    for addr in tokio::net::lookup_host((host, port))
        .await
        .map_err(connect_err)?
    {
        match dial(addr, bind).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }

    Err(connect_err(last_err.unwrap_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "host resolved to no addresses",
        )
    })))
}

async fn dial(addr: SocketAddr, bind: Option<SocketAddr>) -> std::io::Result<TcpStream> {
    let Some(local) = bind else {
        return TcpStream::connect(addr).await;
    };
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.bind(local)?;
    socket.connect(addr).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer_pem() -> String {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params.self_signed(&key).unwrap().pem()
    }

    #[test]
    fn connector_from_pem() {
        TrustAnchor::from_pem(issuer_pem()).connector().unwrap();
    }

    #[test]
    fn connector_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ca.crt");
        std::fs::write(&path, issuer_pem()).unwrap();
        TrustAnchor::from_file(&path).connector().unwrap();
    }

    #[test]
    fn missing_anchor_file() {
        let err = TrustAnchor::from_file("/nonexistent/ca.crt")
            .connector()
            .err()
            .expect("expected an error");
        assert!(matches!(err, TransportError::ReadAnchor { .. }));
    }

    #[test]
    fn empty_anchor_is_rejected() {
        let err = TrustAnchor::from_pem("not a certificate")
            .connector()
            .err()
            .expect("expected an error");
        assert!(matches!(err, TransportError::InvalidAnchor(_)));
    }

    #[tokio::test]
    async fn invalid_host_is_rejected_before_dialling() {
        let anchor = TrustAnchor::from_pem(issuer_pem());
        let err = connect_tls("not a host!", 5000, &anchor, None)
            .await
            .err()
            .expect("expected an error");
        assert!(matches!(err, TransportError::InvalidServerName(_)));
    }

    #[tokio::test]
    async fn refused_connection_is_connect_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let anchor = TrustAnchor::from_pem(issuer_pem());
        let err = connect_tls("127.0.0.1", port, &anchor, None)
            .await
            .err()
            .expect("expected an error");
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}
