//! Storage node addressing.

use crate::error::StoreError;
use std::fmt;
use std::str::FromStr;

/// Network address of a storage node that can host segment replicas.
///
/// Node addresses are plain `host:port` values. Equality is textual; no
/// name resolution is performed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeAddress {
    /// Host name or IP address.
    host: String,
    /// TCP port.
    port: u16,
}

impl NodeAddress {
    /// Creates a new node address.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the host name or IP address.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the TCP port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeAddress {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| StoreError::invalid_address(s))?;
        if host.is_empty() {
            return Err(StoreError::invalid_address(s));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| StoreError::invalid_address(s))?;
        Ok(Self::new(host, port))
    }
}
