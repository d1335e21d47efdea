//! In-memory endpoint for exercising the transport without hardware.
//!
//! [`MockEndpoint`] queues chunks that become readable in push order and
//! records everything written to it. [`MockConnector`] hands the same
//! endpoint to every `open` and counts how often it was asked.

use super::{Address, Connector, Endpoint, EndpointKind};
use crate::config::TransportConfig;
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct MockEndpointInner {
    reads: VecDeque<Vec<u8>>,
    written: Vec<u8>,
    read_failure: Option<io::ErrorKind>,
    write_failure: Option<io::ErrorKind>,
    write_limit: Option<usize>,
    shutdowns: usize,
}

/// Fake endpoint backed by in-memory queues.
#[derive(Default)]
pub struct MockEndpoint {
    inner: Mutex<MockEndpointInner>,
    readable: Condvar,
}

impl MockEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `data` to be returned by a later read.
    pub fn push_read(&self, data: &[u8]) {
        let mut inner = self.inner.lock();
        inner.reads.push_back(data.to_vec());
        self.readable.notify_all();
    }

    /// Chunks not yet consumed by a read.
    pub fn pending_reads(&self) -> Vec<Vec<u8>> {
        self.inner.lock().reads.iter().cloned().collect()
    }

    /// Everything written so far.
    pub fn written(&self) -> Vec<u8> {
        self.inner.lock().written.clone()
    }

    /// Make the endpoint poll readable and every read fail with `kind`.
    pub fn fail_reads(&self, kind: io::ErrorKind) {
        self.inner.lock().read_failure = Some(kind);
        self.readable.notify_all();
    }

    pub fn clear_read_failure(&self) {
        self.inner.lock().read_failure = None;
    }

    /// Make every write fail with `kind`.
    pub fn fail_writes(&self, kind: io::ErrorKind) {
        self.inner.lock().write_failure = Some(kind);
    }

    /// Accept at most `max` bytes per write.
    pub fn limit_writes(&self, max: usize) {
        self.inner.lock().write_limit = Some(max);
    }

    pub fn shutdowns(&self) -> usize {
        self.inner.lock().shutdowns
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdowns() > 0
    }
}

impl Endpoint for MockEndpoint {
    fn kind(&self) -> EndpointKind {
        EndpointKind::Serial
    }

    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        let mut inner = self.inner.lock();
        if inner.reads.is_empty() && inner.read_failure.is_none() {
            let shutdowns = inner.shutdowns;
            // A shutdown wakes the waiter and reads as a timeout.
            self.readable.wait_while_for(
                &mut inner,
                |inner| {
                    inner.reads.is_empty()
                        && inner.read_failure.is_none()
                        && inner.shutdowns == shutdowns
                },
                timeout,
            );
        }
        Ok(!inner.reads.is_empty() || inner.read_failure.is_some())
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock();
        if let Some(kind) = inner.read_failure {
            return Err(io::Error::from(kind));
        }
        let Some(mut chunk) = inner.reads.pop_front() else {
            return Ok(0);
        };

        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            inner.reads.push_front(chunk.split_off(n));
        }
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock();
        if let Some(kind) = inner.write_failure {
            return Err(io::Error::from(kind));
        }
        let n = inner.write_limit.map_or(buf.len(), |max| buf.len().min(max));
        inner.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn shutdown(&self) {
        self.inner.lock().shutdowns += 1;
        self.readable.notify_all();
    }
}

/// Connector that always yields the same [`MockEndpoint`].
///
/// Clones share the endpoint and the counters.
#[derive(Clone)]
pub struct MockConnector {
    inner: Arc<MockConnectorInner>,
}

struct MockConnectorInner {
    endpoint: Arc<MockEndpoint>,
    connects: AtomicUsize,
    fail_next: AtomicBool,
}

impl MockConnector {
    pub fn new(endpoint: Arc<MockEndpoint>) -> Self {
        Self {
            inner: Arc::new(MockConnectorInner {
                endpoint,
                connects: AtomicUsize::new(0),
                fail_next: AtomicBool::new(false),
            }),
        }
    }

    /// Number of connect attempts, failed ones included.
    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Refuse the next connect attempt.
    pub fn fail_next_connect(&self) {
        self.inner.fail_next.store(true, Ordering::SeqCst);
    }
}

impl Connector for MockConnector {
    fn connect(&self, address: &Address, _config: &TransportConfig) -> Result<Arc<dyn Endpoint>> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::ConnectFailed {
                addr: address.to_string(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            });
        }
        Ok(self.inner.endpoint.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_reads_keep_remainder_first() {
        let endpoint = MockEndpoint::new();
        endpoint.push_read(&[1, 2, 3]);
        endpoint.push_read(&[4]);

        let mut buf = [0u8; 2];
        assert_eq!(endpoint.read(&mut buf).unwrap(), 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(endpoint.pending_reads(), vec![vec![3], vec![4]]);
    }

    #[test]
    fn test_shutdown_wakes_waiter() {
        let endpoint = Arc::new(MockEndpoint::new());
        let waiter = {
            let endpoint = endpoint.clone();
            std::thread::spawn(move || endpoint.wait_readable(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        endpoint.shutdown();
        assert!(!waiter.join().unwrap().unwrap());
    }
}
