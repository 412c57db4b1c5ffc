/// Default TCP port of the configuration server
pub const DEFAULT_PORT: u16 = 8844;

/// Protocol version written into every message header
pub const PROTOCOL_VERSION: i16 = 1;

pub const PING_LITERAL: &str = "PING";
pub const PONG_LITERAL: &str = "PONG";

/// Correlation id carried by unsolicited messages (keepalive pings, change notifications)
pub const NO_CORRELATION_ID: i64 = -1;

/// Width of the frame length prefix. The prefix counts itself.
pub const LENGTH_FIELD_LENGTH: usize = 4;

/// 4 MiB
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 4 * 1024 * 1024;

pub const DEFAULT_RECONNECT_DELAY_IN_MS: u64 = 1000;
pub const DEFAULT_CLIENT_IDLE_INTERVAL_IN_SECS: u64 = 5;
pub const DEFAULT_SERVER_IDLE_TIMEOUT_IN_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_IN_MS: u64 = 3000;

/// Capacity of the broadcast channel carrying applied client-side changes
pub(crate) const CHANGE_BROADCAST_CAPACITY: usize = 256;
