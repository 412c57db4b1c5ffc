//! Server side of the protocol.
//!
//! ```text
//! connection reader --RequestInfo--> request lane --> handler worker --> ConfRequests
//!                                                                          |  watch
//!                                                                          v
//!                                     ServerSession <--ValueChanged-- ValueDispatcher
//!                                          |
//! connection writer <-- response writer <--ResponseInfo-- (responses, notifications)
//! ```

mod channel;
mod conf_server;
mod connection;
mod handler_pool;
mod requests;
mod response_handler;
mod session;

pub use channel::*;
pub use conf_server::*;
pub use connection::*;
pub use handler_pool::*;
pub use requests::*;
pub use response_handler::*;
pub use session::*;

#[cfg(test)]
mod channel_test;
#[cfg(test)]
mod conf_server_test;
