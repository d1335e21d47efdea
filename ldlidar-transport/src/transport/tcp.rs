//! TCP endpoint for sensors bridged onto the network.

use super::{wait_readable, Endpoint, EndpointKind};
use crate::error::{Error, Result};
use crate::tracing::prelude::*;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddrV4, TcpStream};
use std::os::fd::AsFd;
use std::time::Duration;

/// A connected, non-blocking TCP stream.
#[derive(Debug)]
pub struct TcpEndpoint {
    stream: TcpStream,
}

impl TcpEndpoint {
    /// Connect to `addr`, then switch the socket to non-blocking mode.
    pub fn connect(addr: SocketAddrV4) -> Result<Self> {
        let stream = TcpStream::connect(addr).map_err(|source| Error::ConnectFailed {
            addr: addr.to_string(),
            source,
        })?;
        stream.set_nonblocking(true)?;

        debug!(%addr, "TCP endpoint connected");
        Ok(Self { stream })
    }
}

impl Endpoint for TcpEndpoint {
    fn kind(&self) -> EndpointKind {
        EndpointKind::Network
    }

    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        wait_readable(self.stream.as_fd(), timeout)
    }

    /// A zero-length read after readiness means the peer has gone away.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match (&self.stream).read(buf) {
            Ok(0) if !buf.is_empty() => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed the connection",
            )),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            other => other,
        }
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        (&self.stream).write(buf)
    }

    fn shutdown(&self) {
        // Wakes any poll blocked on this socket.
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            trace!(error = %e, "TCP shutdown");
        }
    }
}
