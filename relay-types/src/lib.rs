//! # relay-types
//!
//! Wire format types for the tls-relay protocol.
//!
//! This crate provides the pieces shared by the relay server and its clients:
//! - [`Message`] - Protocol messages (LOGIN, MSG, FILE, PING and the replies)
//! - [`Target`] - Broadcast sentinel or a peer address
//! - [`MessageCodec`] - Newline-delimited JSON framing for tokio streams
//! - [`CodecError`] - Framing and parsing errors
//! - [`filename`] - Sanitising untrusted file names

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
mod error;
pub mod filename;
mod messages;
pub mod stamp;
mod target;

pub use codec::{decode_line, encode, Frame, MessageCodec};
pub use error::CodecError;
pub use messages::{
    Ack, AckFile, Chat, ErrorReply, FileFrom, FileMode, FileUpload, Login, LoginOk, Message,
    MessageKind, Ping, Pong, DEFAULT_FILENAME, UNKNOWN_SENDER,
};
pub use stamp::{unix_time, Nonce};
pub use target::{Target, BROADCAST};
