//! Byte transport for LDLiDAR sensors.
//!
//! Opens a sensor attached to a local serial device or bridged onto TCP,
//! runs a receive thread that hands raw bytes to the packet decoder, and
//! offers synchronous write for commands.
//!
//! ```no_run
//! use ldlidar_transport::{Transport, TransportConfig};
//!
//! let mut lidar = Transport::new(TransportConfig::default());
//! lidar.set_read_callback(|chunk| println!("{} bytes", chunk.len()));
//! lidar.open("/dev/ttyUSB0", 230400)?;
//! // ...
//! lidar.close();
//! # Ok::<(), ldlidar_transport::Error>(())
//! ```

pub mod config;
pub mod error;
pub mod sink;
pub mod tracing;
pub mod transport;

pub use config::TransportConfig;
pub use error::{Error, Result};
pub use transport::{Address, Endpoint, EndpointKind, Health, Transport};
