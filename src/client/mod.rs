//! Config client
//!
//! - [`ConfClient`] - entry point, created through [`ClientBuilder`]
//! - [`ConfrSession`] - session id, pending watches and the value cache
//! - [`ConnectionManager`] - reconnect loop with idle pings
//!
//! A dropped connection fails the pending watches; the watched set is sent
//! again in one request as soon as the next connection is up.

mod builder;
mod client;
mod config;
mod session;
mod transport;

pub use builder::*;
pub use client::*;
pub use config::*;
pub use session::*;
pub use transport::*;

#[cfg(test)]
mod session_test;
