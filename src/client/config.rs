use std::time::Duration;

use crate::constants::DEFAULT_CLIENT_IDLE_INTERVAL_IN_SECS;
use crate::constants::DEFAULT_CONNECT_TIMEOUT_IN_MS;
use crate::constants::DEFAULT_MAX_FRAME_LENGTH;
use crate::constants::DEFAULT_PORT;
use crate::constants::DEFAULT_RECONNECT_DELAY_IN_MS;
use crate::Error;
use crate::Result;

/// Client connection parameters
///
/// # Key Configuration Areas
/// - Server endpoint
/// - Keepalive and reconnect cadence
/// - Request lifecycle control
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server host name or IP
    /// Default: 127.0.0.1
    pub address: String,

    /// Default: 8844
    pub port: u16,

    /// A ping is sent after this long without inbound bytes
    /// Default: 5 seconds
    pub idle_interval: Duration,

    /// Fixed delay between reconnect attempts, retried forever
    /// Default: 1 second
    pub reconnect_delay: Duration,

    /// Maximum time to wait for establishing a TCP connection
    /// Default: 3 seconds
    pub connect_timeout: Duration,

    /// Maximum time a watch waits for its response; `None` waits until the
    /// response arrives or the connection drops
    /// Default: None
    pub request_timeout: Option<Duration>,

    /// Messages that can be queued for the socket before sends are rejected
    /// as not writable
    /// Default: 1024
    pub outbound_capacity: usize,

    /// Default: 4 MiB
    pub max_frame_length: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            idle_interval: Duration::from_secs(DEFAULT_CLIENT_IDLE_INTERVAL_IN_SECS),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_IN_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_IN_MS),
            request_timeout: None,
            outbound_capacity: 1024,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

impl ClientConfig {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(Error::InvalidConfig("server address cannot be empty".into()));
        }
        if self.port == 0 {
            return Err(Error::InvalidConfig("server port cannot be 0".into()));
        }
        if self.idle_interval.is_zero() {
            return Err(Error::InvalidConfig("idle_interval must be > 0".into()));
        }
        if self.outbound_capacity == 0 {
            return Err(Error::InvalidConfig("outbound_capacity must be > 0".into()));
        }
        Ok(())
    }
}
