//! Error types for relay-server.

use std::path::PathBuf;

/// Main error type for relay-server operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// TLS material could not be loaded.
    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Artifact storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// File name reduces to nothing usable.
    #[error("invalid artifact name: {name:?}")]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// No artifact with this name.
    #[error("artifact not found: {name}")]
    NotFound {
        /// The missing artifact name.
        name: String,
    },

    /// Underlying filesystem error.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Errors securing an accepted connection. All of them drop it.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The TLS handshake did not complete.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The TLS handshake ran out of time.
    #[error("handshake timed out after {0}s")]
    HandshakeTimeout(u64),
}

/// Failure to write one record to one session.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The session's writer has already been shut down.
    #[error("session closed")]
    Closed,

    /// The record could not be serialized.
    #[error("encode failed: {0}")]
    Encode(#[source] relay_types::CodecError),

    /// The write or flush failed.
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors loading the server certificate or key.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    /// A PEM file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// The PEM file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The PEM input could not be parsed.
    #[error("invalid PEM input: {0}")]
    Pem(#[source] std::io::Error),

    /// The PEM input held no certificate.
    #[error("no certificate found in PEM input")]
    NoCertificate,

    /// The PEM input held no private key.
    #[error("no private key found in PEM input")]
    NoPrivateKey,

    /// rustls rejected the material.
    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
