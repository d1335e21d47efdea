//! Dump raw bytes from a LiDAR.
//!
//! Usage: `ldlidar-cat [PORT] [BAUD]`
//!
//! PORT is a device path or `tcp://A.B.C.D:port` and defaults to
//! `$LDLIDAR_PORT`, then `/dev/ttyUSB0`. BAUD defaults to `$LDLIDAR_BAUD`,
//! then 230400. Received chunks are logged as hex at debug level and a byte
//! count is logged every second; run with `RUST_LOG=debug` to see the data.

use anyhow::{Context, Result};
use std::env;
use tokio::signal::unix::{self, SignalKind};
use tokio::time::{self, Duration};

use ldlidar_transport::tracing::{self, prelude::*};
use ldlidar_transport::{sink, Transport, TransportConfig};

const DEFAULT_PORT: &str = "/dev/ttyUSB0";
const DEFAULT_BAUD: u32 = 230400;

#[tokio::main]
async fn main() -> Result<()> {
    tracing::init_journald_or_stdout();

    let mut args = env::args().skip(1);
    let port = args
        .next()
        .or_else(|| env::var("LDLIDAR_PORT").ok())
        .unwrap_or_else(|| DEFAULT_PORT.to_string());
    let baud = match args.next().or_else(|| env::var("LDLIDAR_BAUD").ok()) {
        Some(s) => s.parse::<u32>().with_context(|| format!("bad baud rate '{s}'"))?,
        None => DEFAULT_BAUD,
    };

    let mut lidar = Transport::new(TransportConfig::from_env());
    let (callback, mut chunks) = sink::channel(64);
    lidar.set_read_callback(callback);
    lidar
        .open(&port, baud)
        .with_context(|| format!("opening {port}"))?;
    info!("Started.");

    let mut sigint = unix::signal(SignalKind::interrupt())?;
    let mut sigterm = unix::signal(SignalKind::terminate())?;
    let mut report = time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            Some(chunk) = chunks.recv() => {
                debug!(len = chunk.len(), data = %hex::encode(&chunk), "rx");
            }
            _ = report.tick() => {
                let health = lidar.health();
                info!(
                    rx_bytes = lidar.rx_count(),
                    read_errors = health.read_errors,
                    dropped_chunks = chunks.dropped(),
                    "Receiving"
                );
            }
            _ = sigint.recv() => break,
            _ = sigterm.recv() => break,
        }
    }

    trace!("Shutting down.");
    tokio::task::spawn_blocking(move || lidar.close()).await?;
    info!("Exiting.");
    Ok(())
}
