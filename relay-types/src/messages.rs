//! Protocol messages for tls-relay.
//!
//! Every record on the wire is a JSON object whose `type` field selects one
//! of the variants of [`Message`]. Client-originated messages carry a
//! `timestamp` and a random `nonce`; server-emitted ones carry `server_time`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::stamp::{unix_time, Nonce};
use crate::target::Target;

/// Filename assumed when a `FILE` message does not name one.
pub const DEFAULT_FILENAME: &str = "received.txt";

/// Sender name used when a message does not declare one.
pub const UNKNOWN_SENDER: &str = "unknown";

/// All possible protocol messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Login request (credentials are never checked)
    Login(Login),
    /// Login accepted
    Ok(LoginOk),
    /// Chat message, either client-submitted or relayed by the server
    Msg(Chat),
    /// Acknowledge a chat message
    Ack(Ack),
    /// File upload from a client
    File(FileUpload),
    /// Acknowledge a file upload
    AckFile(AckFile),
    /// File relayed to a peer by the server
    FileFrom(FileFrom),
    /// Liveness check
    Ping(Ping),
    /// Liveness reply
    Pong(Pong),
    /// Recoverable error reply
    Err(ErrorReply),
}

impl Message {
    /// The discriminator of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Login(_) => MessageKind::Login,
            Message::Ok(_) => MessageKind::Ok,
            Message::Msg(_) => MessageKind::Msg,
            Message::Ack(_) => MessageKind::Ack,
            Message::File(_) => MessageKind::File,
            Message::AckFile(_) => MessageKind::AckFile,
            Message::FileFrom(_) => MessageKind::FileFrom,
            Message::Ping(_) => MessageKind::Ping,
            Message::Pong(_) => MessageKind::Pong,
            Message::Err(_) => MessageKind::Err,
        }
    }

    /// Build a `LOGIN` message.
    pub fn login(username: &str, password: &str) -> Self {
        Message::Login(Login {
            username: username.to_string(),
            password: password.to_string(),
            timestamp: Some(unix_time()),
            nonce: Some(Nonce::generate().into_string()),
        })
    }

    /// Build a client `MSG` addressed to `target`.
    pub fn chat(username: &str, text: &str, target: &Target) -> Self {
        Message::Msg(Chat {
            username: Some(username.to_string()),
            payload: text.to_string(),
            to_ip: Some(target.to_string()),
            timestamp: Some(unix_time()),
            nonce: Some(Nonce::generate().into_string()),
            ..Chat::default()
        })
    }

    /// Build a client `FILE` addressed to `target`.
    pub fn file(username: &str, filename: &str, contents: String, target: &Target) -> Self {
        Message::File(FileUpload {
            username: Some(username.to_string()),
            filename: filename.to_string(),
            payload: contents,
            to_ip: Some(target.to_string()),
            timestamp: Some(unix_time()),
            nonce: Some(Nonce::generate().into_string()),
        })
    }

    /// Build a `PING`.
    pub fn ping() -> Self {
        Message::Ping(Ping {
            timestamp: Some(unix_time()),
        })
    }

    /// Build an `OK` reply.
    pub fn ok(message: &str) -> Self {
        Message::Ok(LoginOk {
            message: message.to_string(),
            server_time: unix_time(),
        })
    }

    /// Build an `ACK` reply.
    pub fn ack(delivered_to: &Target) -> Self {
        Message::Ack(Ack {
            delivered_to: delivered_to.to_string(),
            server_time: unix_time(),
        })
    }

    /// Build a `PONG` reply.
    pub fn pong() -> Self {
        Message::Pong(Pong {
            server_time: unix_time(),
        })
    }

    /// Build an `ERR` reply.
    pub fn error(message: impl Into<String>) -> Self {
        Message::Err(ErrorReply {
            message: message.into(),
            server_time: unix_time(),
        })
    }
}

/// Message discriminators as they appear in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// `LOGIN`
    Login,
    /// `OK`
    Ok,
    /// `MSG`
    Msg,
    /// `ACK`
    Ack,
    /// `FILE`
    File,
    /// `ACK_FILE`
    AckFile,
    /// `FILE_FROM`
    FileFrom,
    /// `PING`
    Ping,
    /// `PONG`
    Pong,
    /// `ERR`
    Err,
}

impl MessageKind {
    /// All kinds, in protocol order.
    pub const ALL: [MessageKind; 10] = [
        MessageKind::Login,
        MessageKind::Ok,
        MessageKind::Msg,
        MessageKind::Ack,
        MessageKind::File,
        MessageKind::AckFile,
        MessageKind::FileFrom,
        MessageKind::Ping,
        MessageKind::Pong,
        MessageKind::Err,
    ];

    /// The wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Login => "LOGIN",
            MessageKind::Ok => "OK",
            MessageKind::Msg => "MSG",
            MessageKind::Ack => "ACK",
            MessageKind::File => "FILE",
            MessageKind::AckFile => "ACK_FILE",
            MessageKind::FileFrom => "FILE_FROM",
            MessageKind::Ping => "PING",
            MessageKind::Pong => "PONG",
            MessageKind::Err => "ERR",
        }
    }

    /// Whether clients may send this kind to the server.
    pub fn is_client_request(&self) -> bool {
        matches!(
            self,
            MessageKind::Login | MessageKind::Msg | MessageKind::File | MessageKind::Ping
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        MessageKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or(())
    }
}

/// Login request.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Login {
    /// Declared user name
    #[serde(default)]
    pub username: String,
    /// Password placeholder, sent inside TLS and never verified
    #[serde(default)]
    pub password: String,
    /// Client send time (seconds since the Unix epoch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    /// Random hex token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl fmt::Debug for Login {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Login")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("timestamp", &self.timestamp)
            .field("nonce", &self.nonce)
            .finish()
    }
}

/// Login accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginOk {
    /// Human-readable status
    pub message: String,
    /// Server time
    pub server_time: f64,
}

/// A chat message.
///
/// Clients fill `username`, `payload` and `to_ip`. When the server relays the
/// message it fills `from`, `from_ip` and `server_time` instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    /// Sender-declared user name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Message text
    #[serde(default)]
    pub payload: String,
    /// Routing target: `"*"` for broadcast or an IP address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_ip: Option<String>,
    /// Sender name attached by the relay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Sender address attached by the relay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_ip: Option<String>,
    /// Relay time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_time: Option<f64>,
    /// Client send time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    /// Random hex token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// Acknowledgement of a chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    /// `"*"` for broadcast, otherwise the target address
    pub delivered_to: String,
    /// Server time
    pub server_time: f64,
}

/// File upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileUpload {
    /// Sender-declared user name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Original file name
    #[serde(default = "default_filename")]
    pub filename: String,
    /// Whole file contents
    #[serde(default)]
    pub payload: String,
    /// `"*"` stores on the server, an address relays to that peer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_ip: Option<String>,
    /// Client send time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    /// Random hex token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

fn default_filename() -> String {
    DEFAULT_FILENAME.to_string()
}

/// What the server did with an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileMode {
    /// Written to server-side storage
    StoredOnServer,
    /// Forwarded to the sessions at the target address
    Relayed,
}

/// Acknowledgement of a file upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckFile {
    /// Stored or relayed
    pub mode: FileMode,
    /// File name as supplied by the sender
    pub filename: String,
    /// Payload length in bytes
    pub size: u64,
    /// Target address (relayed mode only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_ip: Option<String>,
    /// Server time
    pub server_time: f64,
}

/// File relayed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileFrom {
    /// Sender-declared user name
    pub from: String,
    /// Sender address
    pub from_ip: String,
    /// Original file name
    pub filename: String,
    /// Whole file contents
    pub payload: String,
    /// Payload length in bytes
    pub size: u64,
    /// Server time
    pub server_time: f64,
}

/// Liveness check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    /// Client send time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

/// Liveness reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pong {
    /// Server time
    pub server_time: f64,
}

/// Recoverable error reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReply {
    /// Human-readable reason
    pub message: String,
    /// Server time
    pub server_time: f64,
}
