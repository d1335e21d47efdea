//! Common error types for ldlidar-transport.
//!
//! This module provides a centralized Error enum using thiserror. Open-time
//! failures carry the address or path they concern so the caller can decide
//! whether to retry, pick another port, or give up.

use std::io;
use thiserror::Error;

/// Main error type for transport operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed network address (missing separator, bad host or port)
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Serial device could not be opened
    #[error("Failed to open {path}: {source}")]
    OpenFailed {
        path: String,
        #[source]
        source: io::Error,
    },

    /// TCP connection could not be established
    #[error("Failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Terminal attributes or line speed could not be read or applied
    #[error("Configuration error: {0}")]
    ConfigFailed(String),

    /// No data became readable within the poll interval
    #[error("Read timed out")]
    ReadTimeout,

    /// Operation attempted on a closed transport
    #[error("Transport is not open")]
    NotOpen,

    /// Read or write system call failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether the error is the normal "nothing available yet" outcome.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::ReadTimeout)
    }

    pub(crate) fn config(what: &str, err: impl std::fmt::Display) -> Self {
        Error::ConfigFailed(format!("{what}: {err}"))
    }
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_timeout_is_transient() {
        assert!(Error::ReadTimeout.is_transient());
        assert!(!Error::NotOpen.is_transient());
        assert!(!Error::Io(io::Error::from(io::ErrorKind::BrokenPipe)).is_transient());
    }

    #[test]
    fn test_display_includes_context() {
        let err = Error::ConnectFailed {
            addr: "127.0.0.1:9000".into(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert!(err.to_string().starts_with("Failed to connect to 127.0.0.1:9000"));
        assert_eq!(
            Error::config("tcsetattr", "EINVAL").to_string(),
            "Configuration error: tcsetattr: EINVAL"
        );
    }
}
