use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use crate::constants::NO_CORRELATION_ID;
use crate::constants::PROTOCOL_VERSION;
use crate::ProtocolError;

/// Message kind ordinals as they appear on the wire.
///
/// `MetadataRequest`, `MetadataResponse` and `Ack` occupy their ordinals for
/// wire compatibility but carry no defined payload; frames using them are
/// rejected by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum MessageKind {
    WatchRequest = 0,
    WatchResponse = 1,
    MetadataRequest = 2,
    MetadataResponse = 3,
    Ack = 4,
    Ping = 5,
    Pong = 6,
    ConfigChange = 7,
}

impl MessageKind {
    /// Number of ordinals in the enum. Anything outside `0..COUNT` is unknown.
    pub const COUNT: i32 = 8;

    pub fn ordinal(self) -> i32 {
        self as i32
    }

    pub fn from_ordinal(ordinal: i32) -> Result<Self, ProtocolError> {
        let kind = match ordinal {
            0 => MessageKind::WatchRequest,
            1 => MessageKind::WatchResponse,
            2 => MessageKind::MetadataRequest,
            3 => MessageKind::MetadataResponse,
            4 => MessageKind::Ack,
            5 => MessageKind::Ping,
            6 => MessageKind::Pong,
            7 => MessageKind::ConfigChange,
            _ => return Err(ProtocolError::UnknownMessageKind(ordinal)),
        };
        Ok(kind)
    }

    /// Whether the kind has a payload layout this implementation speaks
    pub fn is_supported(self) -> bool {
        !matches!(
            self,
            MessageKind::MetadataRequest | MessageKind::MetadataResponse | MessageKind::Ack
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::WatchRequest => "watch_request",
            MessageKind::WatchResponse => "watch_response",
            MessageKind::MetadataRequest => "metadata_request",
            MessageKind::MetadataResponse => "metadata_response",
            MessageKind::Ack => "ack",
            MessageKind::Ping => "ping",
            MessageKind::Pong => "pong",
            MessageKind::ConfigChange => "config_change",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields shared by every message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: i16,
    /// Client-assigned, echoed unchanged by the server
    pub correlation_id: i64,
    /// Session id of the client the message belongs to
    pub client_id: String,
}

impl Header {
    pub fn new(
        correlation_id: i64,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            correlation_id,
            client_id: client_id.into(),
        }
    }
}

/// Kind-specific part of a message.
///
/// Values use the empty string for "key does not exist"; absence is never
/// encoded any other way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Ping,
    Pong,
    WatchRequest { keys: BTreeSet<String> },
    WatchResponse { data: BTreeMap<String, String> },
    ConfigChange { data: BTreeMap<String, String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub payload: Payload,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self.payload {
            Payload::Ping => MessageKind::Ping,
            Payload::Pong => MessageKind::Pong,
            Payload::WatchRequest { .. } => MessageKind::WatchRequest,
            Payload::WatchResponse { .. } => MessageKind::WatchResponse,
            Payload::ConfigChange { .. } => MessageKind::ConfigChange,
        }
    }

    pub fn correlation_id(&self) -> i64 {
        self.header.correlation_id
    }

    pub fn client_id(&self) -> &str {
        &self.header.client_id
    }

    /// Keepalive probe sent by an idle client
    pub fn ping(client_id: impl Into<String>) -> Self {
        Self {
            header: Header::new(NO_CORRELATION_ID, client_id),
            payload: Payload::Ping,
        }
    }

    /// Answer to `ping`, echoing its header
    pub fn pong_for(ping: &Header) -> Self {
        Self {
            header: ping.clone(),
            payload: Payload::Pong,
        }
    }

    pub fn watch_request(
        correlation_id: i64,
        client_id: impl Into<String>,
        keys: BTreeSet<String>,
    ) -> Self {
        Self {
            header: Header::new(correlation_id, client_id),
            payload: Payload::WatchRequest { keys },
        }
    }

    pub fn watch_response(
        correlation_id: i64,
        client_id: impl Into<String>,
        data: BTreeMap<String, String>,
    ) -> Self {
        Self {
            header: Header::new(correlation_id, client_id),
            payload: Payload::WatchResponse { data },
        }
    }

    pub fn config_change(
        client_id: impl Into<String>,
        data: BTreeMap<String, String>,
    ) -> Self {
        Self {
            header: Header::new(NO_CORRELATION_ID, client_id),
            payload: Payload::ConfigChange { data },
        }
    }
}
