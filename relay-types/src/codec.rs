//! Newline-delimited JSON framing.
//!
//! One record is one JSON object followed by a single `\n`. JSON escaping
//! guarantees that a serialized record never contains a raw newline, so the
//! terminator alone delimits records and no length prefix is needed.
//!
//! [`MessageCodec`] plugs into `tokio_util::codec::{FramedRead, FramedWrite}`;
//! [`encode`] and [`decode_line`] are the same logic without a stream.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;
use crate::messages::{Message, MessageKind};

/// Record terminator.
pub const LINE_TERMINATOR: u8 = b'\n';

/// One decoded record.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A well-formed message of a known kind.
    Message(Message),
    /// A JSON object whose `type` is missing, not a string, or not a known kind.
    UnknownKind(Option<String>),
    /// A known kind whose fields do not have the expected shape.
    Invalid {
        /// The declared kind
        kind: MessageKind,
        /// Why the fields were rejected
        reason: String,
    },
}

/// Serialize one message as a complete, terminated record.
pub fn encode(message: &Message) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    MessageCodec::new().encode(message, &mut buf)?;
    Ok(buf.freeze())
}

/// Classify one record (without its terminator).
///
/// Only records that are not JSON objects are errors; everything else the
/// session can answer and keep going.
pub fn decode_line(record: &[u8]) -> Result<Frame, CodecError> {
    let value: Value =
        serde_json::from_slice(record).map_err(|e| CodecError::Malformed(e.to_string()))?;

    let kind = match &value {
        Value::Object(fields) => match fields.get("type").and_then(Value::as_str) {
            Some(tag) => match tag.parse::<MessageKind>() {
                Ok(kind) => kind,
                Err(()) => return Ok(Frame::UnknownKind(Some(tag.to_string()))),
            },
            None => return Ok(Frame::UnknownKind(None)),
        },
        _ => {
            return Err(CodecError::Malformed(
                "record is not a JSON object".to_string(),
            ))
        }
    };

    match serde_json::from_value::<Message>(value) {
        Ok(message) => Ok(Frame::Message(message)),
        Err(e) => Ok(Frame::Invalid {
            kind,
            reason: e.to_string(),
        }),
    }
}

/// Line codec for [`Message`] records.
#[derive(Debug, Clone, Default)]
pub struct MessageCodec {
    /// Bytes already scanned for a terminator.
    next_index: usize,
    max_length: Option<usize>,
}

impl MessageCodec {
    /// Codec without a record length limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec that rejects records longer than `max_length` bytes.
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            next_index: 0,
            max_length: Some(max_length),
        }
    }

    fn check_length(&self, length: usize) -> Result<(), CodecError> {
        match self.max_length {
            Some(limit) if length > limit => Err(CodecError::LineTooLong { length, limit }),
            _ => Ok(()),
        }
    }
}

impl Decoder for MessageCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        let read_to = buf.len();

        let Some(offset) = buf[self.next_index..read_to]
            .iter()
            .position(|b| *b == LINE_TERMINATOR)
        else {
            self.check_length(read_to)?;
            self.next_index = read_to;
            return Ok(None);
        };

        let newline_index = self.next_index + offset;
        self.check_length(newline_index)?;

        let line = buf.split_to(newline_index + 1);
        self.next_index = 0;

        let mut record = &line[..newline_index];
        if let Some(stripped) = record.strip_suffix(b"\r") {
            record = stripped;
        }

        decode_line(record).map(Some)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }

        // A record cut off by the peer closing is end of stream, not an error.
        buf.clear();
        self.next_index = 0;
        Ok(None)
    }
}

impl<'a> Encoder<&'a Message> for MessageCodec {
    type Error = CodecError;

    fn encode(&mut self, message: &'a Message, dst: &mut BytesMut) -> Result<(), CodecError> {
        let json = serde_json::to_vec(message).map_err(CodecError::Serialization)?;
        dst.reserve(json.len() + 1);
        dst.extend_from_slice(&json);
        dst.put_u8(LINE_TERMINATOR);
        Ok(())
    }
}
