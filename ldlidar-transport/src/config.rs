//! Configuration for the transport layer.
//!
//! The tunables here are the receive chunk size and the readability poll
//! interval. Both have defaults matching the sensor driver's historical
//! behaviour and can be overridden from the environment or deserialized as
//! part of a larger application config.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default bound on a single readability wait.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default size of the worker's scratch buffer.
pub const DEFAULT_RX_CHUNK_SIZE: usize = 4096;

/// Transport tuning parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TransportConfig {
    /// How long a read waits for the endpoint to become readable
    #[serde(
        rename = "poll_interval_ms",
        with = "millis",
        default = "default_poll_interval"
    )]
    pub poll_interval: Duration,

    /// Bytes read per worker iteration
    #[serde(default = "default_rx_chunk_size")]
    pub rx_chunk_size: usize,
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn default_rx_chunk_size() -> usize {
    DEFAULT_RX_CHUNK_SIZE
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            rx_chunk_size: DEFAULT_RX_CHUNK_SIZE,
        }
    }
}

impl TransportConfig {
    /// Defaults, overridden by `LDLIDAR_POLL_INTERVAL_MS` and
    /// `LDLIDAR_RX_CHUNK_SIZE` when those hold positive integers.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = env_positive("LDLIDAR_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(size) = env_positive("LDLIDAR_RX_CHUNK_SIZE") {
            config.rx_chunk_size = size as usize;
        }
        config
    }
}

fn env_positive(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|&v| v > 0)
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.rx_chunk_size, 4096);
    }

    #[test]
    fn test_deserialize_fills_missing_fields() {
        let config: TransportConfig = serde_json::from_str(r#"{"poll_interval_ms": 20}"#).unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(20));
        assert_eq!(config.rx_chunk_size, DEFAULT_RX_CHUNK_SIZE);

        let config: TransportConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, TransportConfig::default());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        std::env::set_var("LDLIDAR_POLL_INTERVAL_MS", "25");
        std::env::set_var("LDLIDAR_RX_CHUNK_SIZE", "512");
        let config = TransportConfig::from_env();
        std::env::remove_var("LDLIDAR_POLL_INTERVAL_MS");
        std::env::remove_var("LDLIDAR_RX_CHUNK_SIZE");

        assert_eq!(config.poll_interval, Duration::from_millis(25));
        assert_eq!(config.rx_chunk_size, 512);
    }

    #[test]
    #[serial]
    fn test_from_env_ignores_garbage_and_zero() {
        std::env::set_var("LDLIDAR_POLL_INTERVAL_MS", "fast");
        std::env::set_var("LDLIDAR_RX_CHUNK_SIZE", "0");
        let config = TransportConfig::from_env();
        std::env::remove_var("LDLIDAR_POLL_INTERVAL_MS");
        std::env::remove_var("LDLIDAR_RX_CHUNK_SIZE");

        assert_eq!(config, TransportConfig::default());
    }
}
