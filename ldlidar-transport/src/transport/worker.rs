//! Receive thread.
//!
//! A [`Worker`] is created by `Transport::open` and consumed by
//! `Transport::close`, so a session can neither leak its thread nor join it
//! twice.

use super::{read_endpoint, Endpoint, ReadCallback};
use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::tracing::prelude::*;
use parking_lot::Mutex;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Last runtime read failure seen by the receive thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadFault {
    pub kind: io::ErrorKind,
    pub message: String,
}

/// Receive-side health of the current session.
///
/// Read failures never stop the receive thread; this is where they become
/// visible to the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Health {
    pub read_errors: u64,
    pub last_error: Option<ReadFault>,
    /// Delivery callbacks that panicked. A panicking callback is removed and
    /// received bytes are counted and dropped until a new one is installed.
    pub callback_panics: u64,
}

pub(super) type SharedCallback = Arc<Mutex<ReadCallback>>;

/// State shared between the transport and its receive thread.
#[derive(Default)]
pub(super) struct Shared {
    // The outer lock is only held to swap the callback, never while it runs.
    callback: Mutex<Option<SharedCallback>>,
    rx_count: AtomicU64,
    health: Mutex<Health>,
}

impl Shared {
    pub(super) fn set_callback(&self, callback: Option<ReadCallback>) {
        *self.callback.lock() = callback.map(|cb| Arc::new(Mutex::new(cb)));
    }

    pub(super) fn rx_count(&self) -> u64 {
        self.rx_count.load(Ordering::Relaxed)
    }

    pub(super) fn health(&self) -> Health {
        self.health.lock().clone()
    }

    pub(super) fn reset_health(&self) {
        *self.health.lock() = Health::default();
    }

    fn deliver(&self, chunk: &[u8]) {
        self.rx_count.fetch_add(chunk.len() as u64, Ordering::Relaxed);

        let Some(callback) = self.callback.lock().clone() else {
            return;
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut deliver = callback.lock();
            (*deliver)(chunk)
        }));
        if outcome.is_err() {
            error!(len = chunk.len(), "Delivery callback panicked, removing it");
            self.health.lock().callback_panics += 1;
            let mut current = self.callback.lock();
            // Leave a callback installed meanwhile by the caller alone.
            if current.as_ref().is_some_and(|cb| Arc::ptr_eq(cb, &callback)) {
                *current = None;
            }
        }
    }

    fn record_fault(&self, err: &io::Error, first_of_run: bool) {
        let mut health = self.health.lock();
        health.read_errors += 1;
        health.last_error = Some(ReadFault {
            kind: err.kind(),
            message: err.to_string(),
        });
        if first_of_run {
            warn!(error = %err, "Receive failed, retrying");
        } else {
            debug!(error = %err, errors = health.read_errors, "Receive still failing");
        }
    }
}

/// Owned handle to a running receive thread.
pub(super) struct Worker {
    exit: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Worker {
    pub(super) fn spawn(
        endpoint: Arc<dyn Endpoint>,
        shared: Arc<Shared>,
        config: &TransportConfig,
    ) -> Result<Self> {
        let exit = Arc::new(AtomicBool::new(false));
        let rx_loop = RxLoop {
            endpoint,
            shared,
            exit: exit.clone(),
            poll_interval: config.poll_interval,
            chunk_size: config.rx_chunk_size.max(1),
        };

        let handle = thread::Builder::new()
            .name("ldlidar-rx".into())
            .spawn(move || rx_loop.run())
            .map_err(Error::Io)?;

        Ok(Self { exit, handle })
    }

    pub(super) fn request_exit(&self) {
        self.exit.store(true, Ordering::Release);
    }

    pub(super) fn join(self) {
        self.request_exit();
        if self.handle.join().is_err() {
            error!("Receive thread panicked");
        }
    }
}

struct RxLoop {
    endpoint: Arc<dyn Endpoint>,
    shared: Arc<Shared>,
    exit: Arc<AtomicBool>,
    poll_interval: Duration,
    chunk_size: usize,
}

impl RxLoop {
    fn run(self) {
        trace!("Receive thread started.");
        let mut buf = vec![0u8; self.chunk_size];
        let mut failing = false;

        while !self.exit.load(Ordering::Acquire) {
            match read_endpoint(self.endpoint.as_ref(), &mut buf, self.poll_interval) {
                Ok(0) => {}
                Ok(n) => {
                    failing = false;
                    self.shared.deliver(&buf[..n]);
                }
                Err(Error::ReadTimeout) => {}
                Err(Error::Io(e)) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(Error::Io(e)) => {
                    if self.exit.load(Ordering::Acquire) {
                        break;
                    }
                    self.shared.record_fault(&e, !failing);
                    failing = true;
                    // A dead handle polls readable forever; don't spin on it.
                    thread::sleep(self.poll_interval);
                }
                Err(e) => {
                    error!(error = %e, "Unexpected receive error");
                    thread::sleep(self.poll_interval);
                }
            }
        }

        trace!("Receive thread stopped.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockEndpoint;
    use std::time::Instant;

    fn config() -> TransportConfig {
        TransportConfig {
            poll_interval: Duration::from_millis(10),
            rx_chunk_size: 16,
        }
    }

    #[test]
    fn test_join_stops_idle_worker_promptly() {
        let endpoint = Arc::new(MockEndpoint::new());
        let shared = Arc::new(Shared::default());
        let worker = Worker::spawn(endpoint.clone(), shared, &config()).unwrap();

        let started = Instant::now();
        worker.join();
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(Arc::strong_count(&endpoint), 1);
    }

    #[test]
    fn test_consecutive_faults_counted() {
        let endpoint = Arc::new(MockEndpoint::new());
        let shared = Arc::new(Shared::default());
        endpoint.fail_reads(io::ErrorKind::TimedOut);
        let worker = Worker::spawn(endpoint.clone(), shared.clone(), &config()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while shared.health().read_errors < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        worker.join();

        let health = shared.health();
        assert!(health.read_errors >= 3);
        assert_eq!(health.last_error.unwrap().kind, io::ErrorKind::TimedOut);
        assert_eq!(shared.rx_count(), 0);
    }

    #[test]
    fn test_panicking_callback_is_removed_and_reading_continues() {
        let endpoint = Arc::new(MockEndpoint::new());
        let shared = Arc::new(Shared::default());
        shared.set_callback(Some(Box::new(|_: &[u8]| panic!("consumer bug"))));
        let worker = Worker::spawn(endpoint.clone(), shared.clone(), &config()).unwrap();

        endpoint.push_read(&[1]);
        endpoint.push_read(&[2, 3]);
        let deadline = Instant::now() + Duration::from_secs(2);
        while shared.rx_count() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        assert!(!worker.handle.is_finished());
        worker.join();
        assert_eq!(shared.rx_count(), 3);
        assert_eq!(shared.health().callback_panics, 1);
        assert!(shared.callback.lock().is_none());
        assert!(endpoint.pending_reads().is_empty());
    }

    #[test]
    fn test_blocked_callback_does_not_block_setter() {
        let endpoint = Arc::new(MockEndpoint::new());
        let shared = Arc::new(Shared::default());
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        shared.set_callback(Some(Box::new(move |_: &[u8]| {
            let _ = entered_tx.send(());
            let _ = release_rx.recv();
        })));
        let worker = Worker::spawn(endpoint.clone(), shared.clone(), &config()).unwrap();

        endpoint.push_read(&[1]);
        entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        // Swapping the callback while the old one is still running.
        let started = Instant::now();
        shared.set_callback(None);
        assert!(started.elapsed() < Duration::from_millis(100));

        release_tx.send(()).unwrap();
        worker.join();
    }
}
