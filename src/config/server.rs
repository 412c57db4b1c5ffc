use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_MAX_FRAME_LENGTH;
use crate::constants::DEFAULT_PORT;
use crate::constants::DEFAULT_SERVER_IDLE_TIMEOUT_IN_SECS;
use crate::Error;
use crate::Result;

/// Smallest frame that still fits a header with a short client id
const MIN_FRAME_LENGTH: usize = 64;

/// Listener and request pipeline settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Inbound command queue capacity, split evenly across handler lanes
    #[serde(default = "default_queue_capacity")]
    pub request_queue_capacity: usize,

    /// Outbound response queue capacity
    #[serde(default = "default_queue_capacity")]
    pub response_queue_capacity: usize,

    /// Number of request handler workers
    #[serde(default = "default_request_handler_threads")]
    pub request_handler_threads: usize,

    /// Connections without inbound traffic for this long are closed
    #[serde(default = "default_idle_timeout_in_secs")]
    pub idle_timeout_in_secs: u64,

    #[serde(default = "default_max_frame_length")]
    pub max_frame_length: usize,

    #[serde(default = "default_tcp_nodelay")]
    pub tcp_nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            request_queue_capacity: default_queue_capacity(),
            response_queue_capacity: default_queue_capacity(),
            request_handler_threads: default_request_handler_threads(),
            idle_timeout_in_secs: default_idle_timeout_in_secs(),
            max_frame_length: default_max_frame_length(),
            tcp_nodelay: default_tcp_nodelay(),
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_in_secs)
    }

    /// Validates listener and pipeline settings
    /// # Errors
    /// Returns `Error::InvalidConfig` when a queue, the worker pool or the
    /// idle timeout is zero, or the frame limit cannot hold a header.
    pub fn validate(&self) -> Result<()> {
        if self.bind_address.trim().is_empty() {
            return Err(Error::InvalidConfig("bind_address cannot be empty".into()));
        }

        if self.request_queue_capacity == 0 || self.response_queue_capacity == 0 {
            return Err(Error::InvalidConfig(format!(
                "queue capacities must be > 0 (request: {}, response: {})",
                self.request_queue_capacity, self.response_queue_capacity
            )));
        }

        if self.request_handler_threads == 0 {
            return Err(Error::InvalidConfig("request_handler_threads must be > 0".into()));
        }

        if self.idle_timeout_in_secs == 0 {
            return Err(Error::InvalidConfig("idle_timeout_in_secs must be > 0".into()));
        }

        if self.max_frame_length < MIN_FRAME_LENGTH {
            return Err(Error::InvalidConfig(format!(
                "max_frame_length {} is below the minimum of {}",
                self.max_frame_length, MIN_FRAME_LENGTH
            )));
        }

        Ok(())
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_queue_capacity() -> usize {
    500
}
fn default_request_handler_threads() -> usize {
    2
}
fn default_idle_timeout_in_secs() -> u64 {
    DEFAULT_SERVER_IDLE_TIMEOUT_IN_SECS
}
fn default_max_frame_length() -> usize {
    DEFAULT_MAX_FRAME_LENGTH
}
fn default_tcp_nodelay() -> bool {
    true
}
