//! Error hierarchy for the configuration distribution service
//!
//! Errors are grouped by the layer that raises them. Framing errors are always
//! fatal to the connection they occurred on; everything else is localized to
//! the single request or session affected.

use std::string::FromUtf8Error;
use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Infrastructure-level failures (I/O, background tasks, queues)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Configuration loading failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Configuration validation failures
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Wire framing failures. The connection must be closed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Transport failures surfaced to the caller
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// External store failures
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Watch requests the server did not confirm
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::System(SystemError::Io(e))
    }
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::Store(StoreError::Sled(e))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Kind ordinal outside the message kind enum
    #[error("Unknown message kind ordinal {0}")]
    UnknownMessageKind(i32),

    /// Kind ordinal inside the enum but without a defined payload
    #[error("Message kind ordinal {0} is reserved and cannot be decoded")]
    UnsupportedMessageKind(i32),

    #[error("Truncated frame while reading {field}: {needed} bytes needed, {remaining} remaining")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("Negative length {length} for {field}")]
    NegativeLength { field: &'static str, length: i32 },

    #[error("{field} is {length} bytes long and does not fit an int32 length")]
    FieldTooLong { field: &'static str, length: usize },

    #[error("Invalid UTF-8 in {field}")]
    InvalidUtf8 {
        field: &'static str,
        #[source]
        source: FromUtf8Error,
    },

    #[error("Frame of {length} bytes exceeds the maximum of {max}")]
    FrameTooLong { length: usize, max: usize },

    /// Length prefix violations reported by the frame splitter
    #[error("Malformed frame: {0}")]
    MalformedFrame(#[source] std::io::Error),

    /// Socket I/O failures while reading or writing frames
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// No live connection to write to
    #[error("Channel is not opened")]
    ChannelNotOpen,

    /// Live connection whose outbound queue is full
    #[error("Channel is not writable")]
    ChannelNotWritable,

    #[error("Failed to connect to {addr}: {source}")]
    ConnectError {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connect to {addr} timed out after {duration:?}")]
    ConnectTimeout { addr: String, duration: Duration },

    /// The connection carrying a pending request was lost
    #[error("Connection lost before the response arrived")]
    ConnectionLost,

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Embedded database errors
    #[error(transparent)]
    Sled(#[from] sled::Error),

    #[error("Failed to subscribe to {key}: {reason}")]
    Subscribe { key: String, reason: String },

    #[error("Store is closed")]
    Closed,

    #[error("Store backend error: {0}")]
    Backend(String),
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The watch response did not contain the requested key
    #[error("Server did not confirm watch on {0}")]
    NotConfirmed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),

    #[error("{0} queue is closed")]
    QueueClosed(&'static str),

    #[error("{0}")]
    SignalSenderClosed(String),
}
