//! Error types for the wire codec.

use thiserror::Error;

/// Errors raised while framing or parsing records.
///
/// All of these are fatal for the stream they occur on: once a record is
/// garbled the following line boundaries cannot be trusted.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The record is not a JSON object
    #[error("malformed record: {0}")]
    Malformed(String),

    /// The record exceeds the configured maximum length
    #[error("record too long: {length} bytes (limit: {limit} bytes)")]
    LineTooLong {
        /// Bytes buffered so far without a terminator
        length: usize,
        /// Configured maximum
        limit: usize,
    },

    /// Serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Underlying stream failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// Whether this error came from the stream rather than the data on it.
    pub fn is_io(&self) -> bool {
        matches!(self, CodecError::Io(_))
    }
}
