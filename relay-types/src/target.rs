//! Routing targets.

use std::fmt;
use std::net::IpAddr;

/// Wire value of `to_ip` meaning "every connected session".
pub const BROADCAST: &str = "*";

/// Where a `MSG` or `FILE` should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Target {
    /// Every registered session
    #[default]
    Broadcast,
    /// Every session registered under this address
    Address(IpAddr),
}

impl Target {
    /// Interpret a `to_ip` field.
    ///
    /// Absent, empty and `"*"` all mean broadcast. Anything else must be an
    /// IP address; the raw value is returned when it is not, so the caller
    /// can name it in the routing error.
    pub fn from_wire(to_ip: Option<&str>) -> Result<Self, String> {
        let raw = match to_ip.map(str::trim) {
            None | Some("") | Some(BROADCAST) => return Ok(Target::Broadcast),
            Some(raw) => raw,
        };
        raw.parse::<IpAddr>()
            .map(|ip| Target::Address(ip.to_canonical()))
            .map_err(|_| raw.to_string())
    }

    /// Whether this is the broadcast sentinel.
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Target::Broadcast)
    }
}

impl From<IpAddr> for Target {
    fn from(ip: IpAddr) -> Self {
        Target::Address(ip.to_canonical())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Broadcast => f.write_str(BROADCAST),
            Target::Address(ip) => write!(f, "{ip}"),
        }
    }
}
