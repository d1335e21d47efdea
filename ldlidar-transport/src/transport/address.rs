//! Endpoint addressing.
//!
//! A port name is either a local device path (`/dev/ttyUSB0`) or a network
//! endpoint written as `tcp://A.B.C.D:port`. The string is classified exactly
//! once, when the transport is opened; everything downstream switches on the
//! resulting [`Address`] variant.

use crate::error::{Error, Result};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Prefix that selects the network variant.
pub const TCP_SCHEME: &str = "tcp://";

/// A classified transport address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// Local serial device
    Serial { path: PathBuf, baud_rate: u32 },
    /// TCP endpoint
    Network { host: Ipv4Addr, port: u16 },
}

impl Address {
    /// Classify `port_name`. The baud rate only matters for serial devices.
    pub fn parse(port_name: &str, baud_rate: u32) -> Result<Self> {
        let Some(host_port) = port_name.strip_prefix(TCP_SCHEME) else {
            return Ok(Address::Serial {
                path: PathBuf::from(port_name),
                baud_rate,
            });
        };

        let (host, port) = host_port
            .split_once(':')
            .ok_or_else(|| Error::InvalidAddress(format!("{port_name}: missing ':port'")))?;

        if port.is_empty() {
            return Err(Error::InvalidAddress(format!("{port_name}: empty port")));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| Error::InvalidAddress(format!("{port_name}: bad port '{port}'")))?;
        let host = host
            .parse::<Ipv4Addr>()
            .map_err(|_| Error::InvalidAddress(format!("{port_name}: bad host '{host}'")))?;

        Ok(Address::Network { host, port })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Serial { path, .. } => write!(f, "{}", path.display()),
            Address::Network { host, port } => write!(f, "{TCP_SCHEME}{host}:{port}"),
        }
    }
}
