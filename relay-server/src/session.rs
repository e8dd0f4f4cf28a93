//! Per-connection session management.
//!
//! Each secured connection gets a Session that reads one record at a time,
//! dispatches it, and writes the reply before reading the next.

use crate::registry::{Registration, SessionHandle};
use crate::server::Relay;
use crate::storage::artifact_name;
use bytes::Bytes;
use futures_util::StreamExt;
use relay_types::{
    unix_time, AckFile, Chat, FileFrom, FileMode, FileUpload, Frame, Message, MessageCodec,
    Target, UNKNOWN_SENDER,
};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf};
use tokio_util::codec::FramedRead;

/// Reply to LOGIN.
pub const LOGIN_ACCEPTED: &str = "login accepted";

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the stream (a trailing partial record is discarded).
    PeerClosed,
    /// The peer sent a record that could not be framed or parsed.
    Malformed(String),
    /// Reading from or writing to the peer failed.
    Io(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed"),
            Self::Malformed(reason) => write!(f, "malformed record: {reason}"),
            Self::Io(reason) => write!(f, "I/O error: {reason}"),
        }
    }
}

/// Session state machine states.
///
/// The handshake is completed by the accept path before a Session exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Reading and answering records.
    Receiving,
    /// Tearing down.
    Closing(CloseReason),
}

/// A per-connection session.
pub struct Session<S> {
    relay: Arc<Relay>,
    reader: FramedRead<ReadHalf<S>, MessageCodec>,
    registration: Registration,
    state: SessionState,
}

impl<S> fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("handle", self.registration.handle())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Split a secured stream and register its write half.
    ///
    /// The session is routable as soon as this returns.
    pub fn start(relay: Arc<Relay>, stream: S, peer: SocketAddr) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let handle = relay.registry().new_handle(peer, write_half);
        let registration = relay.registry().register(handle);

        let codec = match relay.config().limits.max_message_size {
            Some(limit) => MessageCodec::with_max_length(limit),
            None => MessageCodec::new(),
        };

        Self {
            relay,
            reader: FramedRead::new(read_half, codec),
            registration,
            state: SessionState::Receiving,
        }
    }

    /// This session's registry handle.
    pub fn handle(&self) -> &Arc<SessionHandle> {
        self.registration.handle()
    }

    /// Serve records until the peer goes away or misbehaves.
    ///
    /// On return the session is unregistered and its writer shut down.
    pub async fn run(mut self) -> CloseReason {
        let id = self.handle().id();
        let peer = self.handle().peer();
        tracing::info!("Session {} started for {}", id, peer);

        while self.state == SessionState::Receiving {
            self.state = match self.reader.next().await {
                None => SessionState::Closing(CloseReason::PeerClosed),
                Some(Err(e)) if e.is_io() => SessionState::Closing(CloseReason::Io(e.to_string())),
                Some(Err(e)) => {
                    self.relay.metrics().errors_total.fetch_add(1, Ordering::Relaxed);
                    SessionState::Closing(CloseReason::Malformed(e.to_string()))
                }
                Some(Ok(frame)) => {
                    let reply = self.dispatch(frame).await;
                    if matches!(reply, Message::Err(_)) {
                        self.relay.metrics().errors_total.fetch_add(1, Ordering::Relaxed);
                    }
                    match self.handle().send(&reply).await {
                        Ok(()) => SessionState::Receiving,
                        Err(e) => SessionState::Closing(CloseReason::Io(e.to_string())),
                    }
                }
            };
        }

        let reason = match self.state {
            SessionState::Closing(reason) => reason,
            SessionState::Receiving => CloseReason::PeerClosed,
        };

        let handle = Arc::clone(self.registration.handle());
        drop(self.registration);
        drop(self.reader);
        handle.close().await;

        tracing::info!("Session {} ({}) closed: {}", id, peer, reason);
        reason
    }

    async fn dispatch(&self, frame: Frame) -> Message {
        let ip = self.handle().ip();
        // Liveness checks bypass the message limiter.
        if let Frame::Message(Message::Ping(_)) = frame {
            return Message::pong();
        }
        if let Err(e) = self.relay.rate_limits().check_message(ip) {
            tracing::warn!("Session {} from {}: {}", self.handle().id(), ip, e);
            self.relay.metrics().rate_limit_hits.fetch_add(1, Ordering::Relaxed);
            return Message::error("rate limit exceeded");
        }

        match frame {
            Frame::Message(Message::Login(login)) => {
                tracing::debug!("Session {} login as {:?}", self.handle().id(), login.username);
                Message::ok(LOGIN_ACCEPTED)
            }
            Frame::Message(Message::Msg(chat)) => self.relay_chat(chat).await,
            Frame::Message(Message::File(file)) => self.handle_file(file).await,
            Frame::Message(other) => {
                tracing::debug!(
                    "Session {} sent server-only kind {}",
                    self.handle().id(),
                    other.kind()
                );
                Message::error("unknown type")
            }
            Frame::Invalid { kind, reason } if kind.is_client_request() => {
                tracing::debug!("Session {} sent invalid {}: {}", self.handle().id(), kind, reason);
                Message::error(format!("invalid message: {reason}"))
            }
            Frame::Invalid { kind, .. } => {
                tracing::debug!("Session {} sent server-only kind {}", self.handle().id(), kind);
                Message::error("unknown type")
            }
            Frame::UnknownKind(kind) => {
                tracing::debug!("Session {} sent unknown type {:?}", self.handle().id(), kind);
                Message::error("unknown type")
            }
        }
    }

    async fn relay_chat(&self, chat: Chat) -> Message {
        let target = match Target::from_wire(chat.to_ip.as_deref()) {
            Ok(target) => target,
            Err(raw) => return Message::error(format!("unknown recipient ip: {raw}")),
        };

        let metrics = self.relay.metrics();
        metrics
            .bytes_received
            .fetch_add(chat.payload.len() as u64, Ordering::Relaxed);

        let relayed = Message::Msg(Chat {
            from: Some(chat.username.unwrap_or_else(|| UNKNOWN_SENDER.to_string())),
            from_ip: Some(self.handle().ip().to_string()),
            payload: chat.payload,
            server_time: Some(unix_time()),
            ..Chat::default()
        });

        let registry = self.relay.registry();
        match target {
            Target::Broadcast => {
                let exclude = self
                    .relay
                    .config()
                    .routing
                    .exclude_sender
                    .then(|| self.handle().id());
                let delivered = registry.broadcast(&relayed, exclude).await;
                metrics
                    .messages_relayed
                    .fetch_add(delivered as u64, Ordering::Relaxed);
                tracing::debug!(
                    "Session {} broadcast MSG to {} sessions",
                    self.handle().id(),
                    delivered
                );
                Message::ack(&Target::Broadcast)
            }
            Target::Address(ip) => {
                let delivered = registry.deliver_to_address(ip, &relayed).await;
                if delivered == 0 {
                    return Message::error(format!("unknown recipient ip: {ip}"));
                }
                metrics
                    .messages_relayed
                    .fetch_add(delivered as u64, Ordering::Relaxed);
                tracing::debug!(
                    "Session {} sent MSG to {} ({} sessions)",
                    self.handle().id(),
                    ip,
                    delivered
                );
                Message::ack(&target)
            }
        }
    }

    async fn handle_file(&self, file: FileUpload) -> Message {
        let target = match Target::from_wire(file.to_ip.as_deref()) {
            Ok(target) => target,
            Err(raw) => return Message::error(format!("unknown recipient ip for file: {raw}")),
        };

        let size = file.payload.len() as u64;
        let metrics = self.relay.metrics();
        metrics.bytes_received.fetch_add(size, Ordering::Relaxed);

        match target {
            Target::Broadcast => {
                let prefix = &self.relay.config().storage.file_prefix;
                let stored = match artifact_name(prefix, &file.filename) {
                    Ok(name) => self
                        .relay
                        .store()
                        .write_artifact(&name, Bytes::from(file.payload))
                        .await
                        .map(|()| name),
                    Err(e) => Err(e),
                };

                match stored {
                    Ok(name) => {
                        metrics.files_stored.fetch_add(1, Ordering::Relaxed);
                        tracing::info!(
                            "Stored {} from {} ({} bytes)",
                            name,
                            self.handle().peer(),
                            size
                        );
                        Message::AckFile(AckFile {
                            mode: FileMode::StoredOnServer,
                            filename: file.filename,
                            size,
                            to_ip: None,
                            server_time: unix_time(),
                        })
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Failed to store {:?} from {}: {}",
                            file.filename,
                            self.handle().peer(),
                            e
                        );
                        Message::error(format!("storage failure: {e}"))
                    }
                }
            }
            Target::Address(ip) => {
                let relayed = Message::FileFrom(FileFrom {
                    from: file
                        .username
                        .unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
                    from_ip: self.handle().ip().to_string(),
                    filename: file.filename.clone(),
                    payload: file.payload,
                    size,
                    server_time: unix_time(),
                });

                let delivered = self.relay.registry().deliver_to_address(ip, &relayed).await;
                if delivered == 0 {
                    return Message::error(format!("unknown recipient ip for file: {ip}"));
                }
                metrics
                    .files_relayed
                    .fetch_add(delivered as u64, Ordering::Relaxed);
                Message::AckFile(AckFile {
                    mode: FileMode::Relayed,
                    filename: file.filename,
                    size,
                    to_ip: Some(ip.to_string()),
                    server_time: unix_time(),
                })
            }
        }
    }
}
