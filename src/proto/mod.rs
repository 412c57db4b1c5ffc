mod codec;
mod message;

pub use codec::*;
pub use message::*;
