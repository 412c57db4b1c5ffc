//! Binary layout of confr messages.
//!
//! ```text
//! frame   := length:int32 (counts itself) body
//! body    := kind:int32 version:int16 correlationId:int64 clientId:string payload
//! string  := len:int32 bytes(UTF-8)
//! payload := WatchRequest                    count:int32 count*(key:string)
//!          | WatchResponse | ConfigChange    count:int32 count*(key:string value:string)
//!          | Ping | Pong                     literal:string
//! ```
//!
//! All integers are big-endian. Bytes left in a frame after the payload are
//! ignored.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use bytes::Buf;
use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tokio_util::codec::Encoder;
use tokio_util::codec::LengthDelimitedCodec;

use super::Header;
use super::Message;
use super::MessageKind;
use super::Payload;
use crate::constants::LENGTH_FIELD_LENGTH;
use crate::constants::PING_LITERAL;
use crate::constants::PONG_LITERAL;
use crate::ProtocolError;

/// Frames and (de)serializes [`Message`]s on a byte stream.
///
/// Any error returned by [`Decoder::decode`] leaves the stream unaligned; the
/// caller must close the connection.
#[derive(Debug)]
pub struct ConfrCodec {
    frames: LengthDelimitedCodec,
    max_frame_length: usize,
}

impl ConfrCodec {
    pub fn new(max_frame_length: usize) -> Self {
        let frames = LengthDelimitedCodec::builder()
            .length_field_length(LENGTH_FIELD_LENGTH)
            .length_adjustment(-(LENGTH_FIELD_LENGTH as isize))
            .max_frame_length(max_frame_length)
            .new_codec();
        Self {
            frames,
            max_frame_length,
        }
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }
}

impl Decoder for ConfrCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<Message>, ProtocolError> {
        match self.frames.decode(src).map_err(ProtocolError::MalformedFrame)? {
            Some(frame) => decode_body(frame.freeze()).map(Some),
            None => Ok(None),
        }
    }
}

impl Encoder<Message> for ConfrCodec {
    type Error = ProtocolError;

    fn encode(
        &mut self,
        message: Message,
        dst: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        let mut body = BytesMut::new();
        encode_body(&message, &mut body)?;
        // The limit covers the whole frame, prefix included.
        let frame_length = body.len() + LENGTH_FIELD_LENGTH;
        if frame_length > self.max_frame_length {
            return Err(ProtocolError::FrameTooLong {
                length: frame_length,
                max: self.max_frame_length,
            });
        }
        self.frames
            .encode(body.freeze(), dst)
            .map_err(ProtocolError::MalformedFrame)
    }
}

/// Writes the frame body (everything after the length prefix).
pub fn encode_body(
    message: &Message,
    dst: &mut BytesMut,
) -> Result<(), ProtocolError> {
    dst.put_i32(message.kind().ordinal());
    dst.put_i16(message.header.version);
    dst.put_i64(message.header.correlation_id);
    put_string(dst, "client_id", &message.header.client_id)?;

    match &message.payload {
        Payload::Ping => put_string(dst, "ping literal", PING_LITERAL)?,
        Payload::Pong => put_string(dst, "pong literal", PONG_LITERAL)?,
        Payload::WatchRequest { keys } => {
            put_len(dst, "key count", keys.len())?;
            for key in keys {
                put_string(dst, "key", key)?;
            }
        }
        Payload::WatchResponse { data } | Payload::ConfigChange { data } => {
            put_len(dst, "entry count", data.len())?;
            for (key, value) in data {
                put_string(dst, "key", key)?;
                put_string(dst, "value", value)?;
            }
        }
    }
    Ok(())
}

/// Parses a frame body (everything after the length prefix).
pub fn decode_body(mut src: Bytes) -> Result<Message, ProtocolError> {
    let ordinal = get_i32(&mut src, "kind")?;
    let kind = MessageKind::from_ordinal(ordinal)?;
    if !kind.is_supported() {
        return Err(ProtocolError::UnsupportedMessageKind(ordinal));
    }

    ensure(&src, "version", 2)?;
    let version = src.get_i16();
    ensure(&src, "correlation_id", 8)?;
    let correlation_id = src.get_i64();
    let client_id = get_string(&mut src, "client_id")?;

    let payload = match kind {
        MessageKind::Ping => {
            skip_literal(&mut src, "ping literal")?;
            Payload::Ping
        }
        MessageKind::Pong => {
            skip_literal(&mut src, "pong literal")?;
            Payload::Pong
        }
        MessageKind::WatchRequest => {
            let count = get_len(&mut src, "key count")?;
            let mut keys = BTreeSet::new();
            for _ in 0..count {
                keys.insert(get_string(&mut src, "key")?);
            }
            Payload::WatchRequest { keys }
        }
        MessageKind::WatchResponse => Payload::WatchResponse {
            data: get_entries(&mut src)?,
        },
        MessageKind::ConfigChange => Payload::ConfigChange {
            data: get_entries(&mut src)?,
        },
        MessageKind::MetadataRequest | MessageKind::MetadataResponse | MessageKind::Ack => {
            return Err(ProtocolError::UnsupportedMessageKind(ordinal));
        }
    };

    Ok(Message {
        header: Header {
            version,
            correlation_id,
            client_id,
        },
        payload,
    })
}

fn ensure(
    src: &Bytes,
    field: &'static str,
    needed: usize,
) -> Result<(), ProtocolError> {
    if src.remaining() < needed {
        return Err(ProtocolError::Truncated {
            field,
            needed,
            remaining: src.remaining(),
        });
    }
    Ok(())
}

fn get_i32(
    src: &mut Bytes,
    field: &'static str,
) -> Result<i32, ProtocolError> {
    ensure(src, field, 4)?;
    Ok(src.get_i32())
}

fn get_len(
    src: &mut Bytes,
    field: &'static str,
) -> Result<usize, ProtocolError> {
    let length = get_i32(src, field)?;
    if length < 0 {
        return Err(ProtocolError::NegativeLength { field, length });
    }
    Ok(length as usize)
}

fn get_string(
    src: &mut Bytes,
    field: &'static str,
) -> Result<String, ProtocolError> {
    let len = get_len(src, field)?;
    ensure(src, field, len)?;
    let raw = src.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|source| ProtocolError::InvalidUtf8 { field, source })
}

fn skip_literal(
    src: &mut Bytes,
    field: &'static str,
) -> Result<(), ProtocolError> {
    let len = get_len(src, field)?;
    ensure(src, field, len)?;
    src.advance(len);
    Ok(())
}

fn get_entries(src: &mut Bytes) -> Result<BTreeMap<String, String>, ProtocolError> {
    let count = get_len(src, "entry count")?;
    let mut data = BTreeMap::new();
    for _ in 0..count {
        let key = get_string(src, "key")?;
        let value = get_string(src, "value")?;
        data.insert(key, value);
    }
    Ok(data)
}

fn put_len(
    dst: &mut BytesMut,
    field: &'static str,
    length: usize,
) -> Result<(), ProtocolError> {
    let length = i32::try_from(length).map_err(|_| ProtocolError::FieldTooLong { field, length })?;
    dst.put_i32(length);
    Ok(())
}

fn put_string(
    dst: &mut BytesMut,
    field: &'static str,
    value: &str,
) -> Result<(), ProtocolError> {
    put_len(dst, field, value.len())?;
    dst.put_slice(value.as_bytes());
    Ok(())
}
