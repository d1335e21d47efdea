//! Bounded-channel delivery.
//!
//! For consumers that would rather drain a queue than run inside the receive
//! thread. Chunks keep their read order; the receive thread is the only
//! producer.

use crate::tracing::prelude::*;
use crate::transport::ReadCallback;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Receiving half of [`channel`].
pub struct ChunkReceiver {
    rx: mpsc::Receiver<Vec<u8>>,
    dropped: Arc<AtomicU64>,
}

impl ChunkReceiver {
    /// Next chunk, or `None` once the callback has been dropped.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.rx.try_recv().ok()
    }

    /// Chunks discarded because the channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Build a delivery callback that forwards copies of each chunk to the
/// returned receiver.
///
/// The callback never blocks the receive thread. When the channel is full
/// the chunk is dropped and counted in [`ChunkReceiver::dropped`]. Once the
/// receiver is dropped, chunks are discarded silently.
pub fn channel(capacity: usize) -> (ReadCallback, ChunkReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));

    let counter = dropped.clone();
    let callback: ReadCallback = Box::new(move |chunk: &[u8]| {
        match tx.try_send(chunk.to_vec()) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(chunk)) => {
                let total = counter.fetch_add(1, Ordering::Relaxed) + 1;
                if total == 1 {
                    warn!(len = chunk.len(), "Chunk channel full, dropping data");
                } else {
                    debug!(len = chunk.len(), dropped = total, "Chunk channel full");
                }
            }
        }
    });

    (callback, ChunkReceiver { rx, dropped })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::transport::mock::{MockConnector, MockEndpoint};
    use crate::transport::Transport;
    use std::sync::mpsc as std_mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn transport(endpoint: &Arc<MockEndpoint>) -> Transport {
        Transport::with_connector(
            TransportConfig {
                poll_interval: Duration::from_millis(10),
                ..TransportConfig::default()
            },
            MockConnector::new(endpoint.clone()),
        )
    }

    #[tokio::test]
    async fn test_chunks_arrive_in_order() {
        let endpoint = Arc::new(MockEndpoint::new());
        let mut transport = transport(&endpoint);
        let (callback, mut rx) = channel(2);
        transport.set_read_callback(callback);
        transport.open("/dev/fake0", 230400).unwrap();

        for i in 0u8..8 {
            endpoint.push_read(&[i, i]);
            let chunk = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(chunk, vec![i, i]);
        }
        assert_eq!(rx.dropped(), 0);

        tokio::task::spawn_blocking(move || transport.close()).await.unwrap();
    }

    #[test]
    fn test_full_channel_drops_newest_and_counts() {
        let (mut callback, mut rx) = channel(1);
        callback(&[1]);
        callback(&[2]);
        callback(&[3]);

        assert_eq!(rx.dropped(), 2);
        assert_eq!(rx.try_recv(), Some(vec![1]));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn test_close_with_full_undrained_channel() {
        let endpoint = Arc::new(MockEndpoint::new());
        let mut transport = transport(&endpoint);
        let (callback, rx) = channel(1);
        transport.set_read_callback(callback);
        transport.open("/dev/fake0", 230400).unwrap();

        for i in 0u8..3 {
            endpoint.push_read(&[i]);
        }
        let deadline = Instant::now() + Duration::from_secs(2);
        while transport.rx_count() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        // The receiver stays alive and is never drained.
        let (done_tx, done_rx) = std_mpsc::channel();
        thread::spawn(move || {
            transport.close();
            let _ = done_tx.send(transport.is_open());
        });
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(2)), Ok(false));
        assert_eq!(rx.dropped(), 2);
    }

    #[test]
    fn test_dropped_receiver_discards() {
        let (mut callback, rx) = channel(1);
        drop(rx);
        callback(&[1, 2, 3]);
        callback(&[4]);
    }
}
