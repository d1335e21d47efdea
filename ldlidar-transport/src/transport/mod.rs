//! Physical transport layer for the sensor link.
//!
//! This module owns the raw byte stream to a LiDAR: a local serial device or
//! a TCP socket, chosen by the address string handed to [`Transport::open`].
//! It knows nothing about the sensor's packet format; received bytes are
//! handed to a delivery callback from a dedicated receive thread.

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::tracing::prelude::*;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::io;
use std::net::SocketAddrV4;
use std::os::fd::BorrowedFd;
use std::sync::Arc;
use std::time::Duration;

pub mod address;
pub mod mock;
pub mod serial;
pub mod tcp;
mod worker;

pub use address::Address;
pub use serial::SerialEndpoint;
pub use tcp::TcpEndpoint;
pub use worker::{Health, ReadFault};

use worker::{Shared, Worker};

/// Consumer of received bytes. The slice is only valid for the duration of
/// the call.
pub type ReadCallback = Box<dyn FnMut(&[u8]) + Send>;

/// Which addressing scheme an endpoint was opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum EndpointKind {
    Serial,
    Network,
}

/// One live, non-blocking communication handle.
///
/// All methods take `&self`: the session and its receive thread share the
/// endpoint, and the kernel serializes the underlying calls.
pub trait Endpoint: Send + Sync {
    fn kind(&self) -> EndpointKind;

    /// Wait up to `timeout` for the endpoint to become readable.
    ///
    /// Returns `Ok(false)` on timeout.
    fn wait_readable(&self, timeout: Duration) -> io::Result<bool>;

    /// One read call.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// One write call; may write fewer bytes than offered.
    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Unblock any pending wait ahead of the handle being released.
    fn shutdown(&self) {}
}

/// Creates endpoints for classified addresses.
pub trait Connector: Send + Sync {
    fn connect(&self, address: &Address, config: &TransportConfig) -> Result<Arc<dyn Endpoint>>;
}

/// Connector for real devices and sockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConnector;

impl Connector for SystemConnector {
    fn connect(&self, address: &Address, _config: &TransportConfig) -> Result<Arc<dyn Endpoint>> {
        match address {
            Address::Serial { path, baud_rate } => {
                Ok(Arc::new(SerialEndpoint::open(path, *baud_rate)?))
            }
            Address::Network { host, port } => {
                let addr = SocketAddrV4::new(*host, *port);
                Ok(Arc::new(TcpEndpoint::connect(addr)?))
            }
        }
    }
}

/// `poll(2)` a single descriptor for input.
///
/// Hang-ups with nothing left to read and invalid descriptors are reported
/// as errors. A hang-up that still polls readable is left to the endpoint's
/// read, which sees end of file.
pub(crate) fn wait_readable(fd: BorrowedFd<'_>, timeout: Duration) -> io::Result<bool> {
    let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];

    match poll(&mut fds, PollTimeout::from(millis)) {
        Ok(0) => Ok(false),
        Ok(_) => {
            let revents = fds[0].revents().unwrap_or(PollFlags::empty());
            if revents.contains(PollFlags::POLLIN) {
                Ok(true)
            } else if revents.contains(PollFlags::POLLNVAL) {
                Err(io::Error::from(Errno::EBADF))
            } else if revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR) {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "endpoint hung up"))
            } else {
                Ok(false)
            }
        }
        Err(errno) => Err(io::Error::from(errno)),
    }
}

struct Session {
    address: Address,
    endpoint: Arc<dyn Endpoint>,
    worker: Worker,
}

/// Duplex byte transport with a background receive thread.
///
/// ```text
/// CLOSED --open--> OPEN --close--> CLOSED
/// ```
///
/// Opening an already open transport closes the current session first, so
/// at most one receive thread exists per transport. Dropping the transport
/// closes it.
pub struct Transport {
    connector: Box<dyn Connector>,
    config: TransportConfig,
    shared: Arc<Shared>,
    session: Option<Session>,
}

impl Transport {
    /// Transport for real serial devices and TCP sockets.
    pub fn new(config: TransportConfig) -> Self {
        Self::with_connector(config, SystemConnector)
    }

    /// Transport whose endpoints come from `connector`.
    pub fn with_connector(config: TransportConfig, connector: impl Connector + 'static) -> Self {
        Self {
            connector: Box::new(connector),
            config,
            shared: Arc::new(Shared::default()),
            session: None,
        }
    }

    /// Install the delivery callback. Takes effect from the next received
    /// chunk, whether or not the transport is open.
    ///
    /// The callback runs on the receive thread, and `close` waits for a
    /// running call to return. A callback that panics is removed and counted
    /// in [`Health::callback_panics`].
    pub fn set_read_callback(&self, callback: impl FnMut(&[u8]) + Send + 'static) {
        self.shared.set_callback(Some(Box::new(callback)));
    }

    /// Remove the delivery callback; received bytes are then counted and
    /// dropped.
    pub fn clear_read_callback(&self) {
        self.shared.set_callback(None);
    }

    /// Open `port_name` and start the receive thread.
    ///
    /// `port_name` is either a device path or `tcp://A.B.C.D:port`;
    /// `baud_rate` only applies to devices. On failure the transport is
    /// closed and may be opened again.
    pub fn open(&mut self, port_name: &str, baud_rate: u32) -> Result<()> {
        if self.session.is_some() {
            debug!("Reopening, closing current session first");
            self.close();
        }

        let address = Address::parse(port_name, baud_rate)?;

        let endpoint = self.connector.connect(&address, &self.config)?;
        self.shared.reset_health();

        let worker = Worker::spawn(endpoint.clone(), self.shared.clone(), &self.config)?;

        info!(%address, kind = %endpoint.kind(), "Transport opened");
        self.session = Some(Session {
            address,
            endpoint,
            worker,
        });
        Ok(())
    }

    /// Stop the receive thread and release the endpoint.
    ///
    /// Closing a closed transport does nothing.
    pub fn close(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        session.worker.request_exit();
        session.endpoint.shutdown();
        drop(session.endpoint);
        session.worker.join();

        info!(address = %session.address, "Transport closed");
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Address of the open session.
    pub fn address(&self) -> Option<&Address> {
        self.session.as_ref().map(|s| &s.address)
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Total bytes received since the transport was created.
    pub fn rx_count(&self) -> u64 {
        self.shared.rx_count()
    }

    /// Runtime read faults seen by the receive thread in this session.
    pub fn health(&self) -> Health {
        self.shared.health()
    }

    /// Wait up to the poll interval for data and perform one read.
    ///
    /// Returns [`Error::ReadTimeout`] when nothing arrived in time; that is
    /// the normal idle outcome, not a fault. Note the receive thread is
    /// reading the same endpoint, so bytes go to whichever reader gets there
    /// first.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let session = self.session.as_ref().ok_or(Error::NotOpen)?;
        read_endpoint(session.endpoint.as_ref(), buf, self.config.poll_interval)
    }

    /// Perform one write; the count may be short of `buf.len()`.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        let session = self.session.as_ref().ok_or(Error::NotOpen)?;
        Ok(session.endpoint.write(buf)?)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

pub(crate) fn read_endpoint(
    endpoint: &dyn Endpoint,
    buf: &mut [u8],
    poll_interval: Duration,
) -> Result<usize> {
    if !endpoint.wait_readable(poll_interval)? {
        return Err(Error::ReadTimeout);
    }
    Ok(endpoint.read(buf)?)
}
