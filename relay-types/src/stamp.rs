//! Timestamps and nonces attached to messages.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of random bytes in a nonce.
pub const NONCE_LEN: usize = 8;

/// Current time as fractional seconds since the Unix epoch.
pub fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Random token distinguishing otherwise identical messages.
///
/// Nothing checks nonce uniqueness, so this is not replay protection.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Nonce([u8; NONCE_LEN]);

impl Nonce {
    /// Generate a fresh random nonce.
    pub fn generate() -> Self {
        Self(rand::random())
    }

    /// Hex encoding as sent on the wire.
    pub fn into_string(self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({self})")
    }
}
