//! Server side of the secure channel.
//!
//! Loads the certificate chain and private key, and builds a rustls
//! acceptor (ring provider, no client authentication).

use crate::error::TlsError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// Where the server certificate and key come from.
#[derive(Clone)]
pub enum TlsIdentity {
    /// PEM files on disk.
    Files {
        /// Certificate chain, leaf first.
        cert_path: PathBuf,
        /// Private key (PKCS#8, PKCS#1 or SEC1).
        key_path: PathBuf,
    },
    /// PEM contents already in memory.
    Pem {
        /// Certificate chain, leaf first.
        cert: Vec<u8>,
        /// Private key.
        key: Vec<u8>,
    },
}

impl std::fmt::Debug for TlsIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Files {
                cert_path,
                key_path,
            } => f
                .debug_struct("Files")
                .field("cert_path", cert_path)
                .field("key_path", key_path)
                .finish(),
            Self::Pem { cert, .. } => f
                .debug_struct("Pem")
                .field("cert_len", &cert.len())
                .field("key", &"[REDACTED]")
                .finish(),
        }
    }
}

impl TlsIdentity {
    /// Identity read from PEM files.
    pub fn from_files(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self::Files {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }

    /// Identity from in-memory PEM.
    pub fn from_pem(cert: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> Self {
        Self::Pem {
            cert: cert.into(),
            key: key.into(),
        }
    }

    /// Parse the material and build an acceptor.
    pub fn load_acceptor(&self) -> Result<TlsAcceptor, TlsError> {
        let (cert_pem, key_pem) = match self {
            Self::Files {
                cert_path,
                key_path,
            } => (read_pem(cert_path)?, read_pem(key_path)?),
            Self::Pem { cert, key } => (cert.clone(), key.clone()),
        };

        let certs = parse_certs(&cert_pem)?;
        let key = parse_private_key(&key_pem)?;

        let config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, TlsError> {
    std::fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = pem;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(TlsError::Pem)?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificate);
    }
    Ok(certs)
}

fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = pem;
    rustls_pemfile::private_key(&mut reader)
        .map_err(TlsError::Pem)?
        .ok_or(TlsError::NoPrivateKey)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed() -> (String, String) {
        let key = rcgen::KeyPair::generate().unwrap();
        let params = rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        let cert = params.self_signed(&key).unwrap();
        (cert.pem(), key.serialize_pem())
    }

    #[test]
    fn acceptor_from_pem() {
        let (cert, key) = self_signed();
        TlsIdentity::from_pem(cert, key).load_acceptor().unwrap();
    }

    #[test]
    fn acceptor_from_files() {
        let (cert, key) = self_signed();
        let dir = tempfile::TempDir::new().unwrap();
        let cert_path = dir.path().join("server.crt");
        let key_path = dir.path().join("server.key");
        std::fs::write(&cert_path, cert).unwrap();
        std::fs::write(&key_path, key).unwrap();

        TlsIdentity::from_files(cert_path, key_path)
            .load_acceptor()
            .unwrap();
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = TlsIdentity::from_files("/nonexistent/server.crt", "/nonexistent/server.key")
            .load_acceptor()
            .err()
            .expect("expected an error");
        assert!(matches!(err, TlsError::Read { .. }));
    }

    #[test]
    fn empty_pem_is_rejected() {
        let (_, key) = self_signed();
        let err = TlsIdentity::from_pem(Vec::new(), key)
            .load_acceptor()
            .err()
            .expect("expected an error");
        assert!(matches!(err, TlsError::NoCertificate));

        let (cert, _) = self_signed();
        let err = TlsIdentity::from_pem(cert, Vec::new())
            .load_acceptor()
            .err()
            .expect("expected an error");
        assert!(matches!(err, TlsError::NoPrivateKey));
    }

    #[test]
    fn debug_redacts_key() {
        let identity = TlsIdentity::from_pem("cert", "secret-key-material");
        let debug = format!("{identity:?}");
        assert!(!debug.contains("secret-key-material"));
    }
}
