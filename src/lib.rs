//! # confr
//!
//! Push-based configuration distribution over a small binary TCP protocol.
//!
//! Clients watch keys on a [`ConfServer`]; the server answers with current
//! values and then pushes every change of a watched key. Values live in a
//! pluggable [`ValueStore`] which the server subscribes to once per key, no
//! matter how many connections watch it.
//!
//! ## Layout
//! - [`Message`] and [`ConfrCodec`] - message model and length-prefixed codec
//! - [`ConfClient`] - client session, cache and reconnect loop
//! - [`ConfServer`] - accept loop, handler pool and response writer
//! - [`ValueDispatcher`] - ref-counted store subscriptions with fan-out

mod client;
mod config;
mod errors;
mod proto;
mod server;
mod storage;
mod watch;

pub mod constants;
pub mod metrics;

pub use client::*;
pub use config::*;
pub use errors::*;
pub use proto::*;
pub use server::*;
pub use storage::*;
pub use watch::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
