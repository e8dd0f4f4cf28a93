//! RelayClient - the client side of a relay session.
//!
//! This module provides [`RelayClient`], which opens a secure channel to a
//! relay server, logs in, and then sends requests while a background task
//! hands every received record to an event callback.
//!
//! # Example
//!
//! ```ignore
//! use relay_client::{ClientConfig, ClientEvent, RelayClient, TrustAnchor};
//! use relay_types::Target;
//!
//! let config = ClientConfig::new("relay.local", 5000, "alice", TrustAnchor::from_file("ca.crt"));
//! let client = RelayClient::new(config);
//!
//! client.connect(|event| println!("{event:?}")).await?;
//! client.send_message("hello everyone", &Target::Broadcast).await?;
//! client.send_file("notes.txt", &"10.0.0.9".parse::<std::net::IpAddr>()?.into()).await?;
//! client.disconnect().await?;
//! ```

use futures_util::{SinkExt, StreamExt};
use relay_types::{
    filename, CodecError, FileFrom, Frame, Message, MessageCodec, Target, DEFAULT_FILENAME,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::transport::{connect_tls, TransportError, TrustAnchor};

/// Marker prepended to saved FILE_FROM payloads: `received_<basename>`.
pub const RECEIVED_PREFIX: &str = "received";

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Encoding or writing a record failed.
    #[error("send failed: {0}")]
    Send(#[from] CodecError),

    /// A file to upload could not be read as UTF-8 text.
    #[error("failed to read {path}: {source}")]
    File {
        /// The file being uploaded.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Not connected to relay.
    #[error("not connected")]
    NotConnected,

    /// A session is already open.
    #[error("already connected")]
    AlreadyConnected,
}

/// Configuration for RelayClient.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay host name or IP address; must match the server certificate.
    pub host: String,
    /// Relay port.
    pub port: u16,
    /// Name announced in LOGIN and attached to every message.
    pub username: String,
    /// Sent in LOGIN; the relay does not check it.
    pub password: String,
    /// Issuer the server certificate must chain to.
    pub trust_anchor: TrustAnchor,
    /// Local address to bind before connecting.
    pub bind_address: Option<SocketAddr>,
    /// Where relayed files are saved. Nothing is written when unset.
    pub download_dir: Option<PathBuf>,
}

impl ClientConfig {
    /// Create a configuration with an empty password and no local bind.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        trust_anchor: TrustAnchor,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: String::new(),
            trust_anchor,
            bind_address: None,
            download_dir: None,
        }
    }

    /// Set the LOGIN password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Bind the local end of the connection to `addr`.
    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = Some(addr);
        self
    }

    /// Save every FILE_FROM payload under `dir` as `received_<basename>`.
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }
}

/// Something that happened on the receive side.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A well-formed record from the relay.
    Message(Message),
    /// A JSON object the client does not understand; `kind` is its `type`.
    Unrecognized {
        /// The declared type, if it was a string.
        kind: Option<String>,
    },
    /// A relayed file was written to the download directory. Follows the
    /// FILE_FROM message it came from.
    FileSaved {
        /// Sender-declared name of the uploader.
        from: String,
        /// Address the file was sent from.
        from_ip: String,
        /// Where the payload was written.
        path: PathBuf,
    },
    /// A relayed file could not be written to the download directory.
    FileSaveFailed {
        /// Name the sender gave the file.
        filename: String,
        /// What went wrong.
        reason: String,
    },
    /// The session ended. Delivered exactly once, last.
    Disconnected {
        /// Why the receive loop stopped.
        reason: String,
    },
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A relay session.
pub struct RelayClient {
    config: ClientConfig,
    writer: Mutex<Option<FramedWrite<BoxedWriter, MessageCodec>>>,
    connected: Arc<AtomicBool>,
    receiver: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("username", &self.config.username)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl RelayClient {
    /// Create a client. Nothing is dialled until [`connect`](Self::connect).
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            writer: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            receiver: std::sync::Mutex::new(None),
        }
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Dial the relay over TLS and log in.
    ///
    /// `on_event` runs on the receive task for every record the relay sends.
    pub async fn connect<F>(&self, on_event: F) -> Result<(), ClientError>
    where
        F: FnMut(ClientEvent) + Send + 'static,
    {
        if self.is_connected() {
            return Err(ClientError::AlreadyConnected);
        }

        let stream = connect_tls(
            &self.config.host,
            self.config.port,
            &self.config.trust_anchor,
            self.config.bind_address,
        )
        .await?;
        tracing::info!(
            "Secure channel established with {}:{}",
            self.config.host,
            self.config.port
        );

        self.connect_over(stream, on_event).await
    }

    /// Log in over an already established stream and start the receive task.
    pub async fn connect_over<S, F>(&self, stream: S, on_event: F) -> Result<(), ClientError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
        F: FnMut(ClientEvent) + Send + 'static,
    {
        let mut guard = self.writer.lock().await;
        if guard.is_some() && self.is_connected() {
            return Err(ClientError::AlreadyConnected);
        }

        let (read_half, write_half) = tokio::io::split(stream);
        let mut writer = FramedWrite::new(Box::new(write_half) as BoxedWriter, MessageCodec::new());
        writer
            .send(&Message::login(&self.config.username, &self.config.password))
            .await?;

        *guard = Some(writer);
        self.connected.store(true, Ordering::SeqCst);

        let reader = FramedRead::new(read_half, MessageCodec::new());
        let task = tokio::spawn(receive_loop(
            reader,
            Arc::clone(&self.connected),
            self.config.download_dir.clone(),
            on_event,
        ));
        let previous = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }

        Ok(())
    }

    /// Whether the session is open.
    ///
    /// Turns false on [`disconnect`](Self::disconnect) or when the receive
    /// task sees the relay go away.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Send any message as-is.
    pub async fn send(&self, message: &Message) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ClientError::NotConnected)?;
        writer.send(message).await?;
        Ok(())
    }

    /// Send a chat message.
    pub async fn send_message(&self, text: &str, target: &Target) -> Result<(), ClientError> {
        self.send(&Message::chat(&self.config.username, text, target))
            .await
    }

    /// Upload a whole text file.
    ///
    /// Broadcast uploads are stored by the relay; addressed ones are
    /// forwarded to the sessions at that address. Only the final path
    /// component of `path` is sent as the file name.
    pub async fn send_file(
        &self,
        path: impl AsRef<Path>,
        target: &Target,
    ) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let path = path.as_ref();
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ClientError::File {
                    path: path.to_path_buf(),
                    source,
                })?;
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(DEFAULT_FILENAME);

        tracing::debug!("Uploading {} ({} bytes) to {}", filename, contents.len(), target);
        self.send(&Message::file(&self.config.username, filename, contents, target))
            .await
    }

    /// Send a PING.
    pub async fn ping(&self) -> Result<(), ClientError> {
        self.send(&Message::ping()).await
    }

    /// Close the write side. The receive task ends when the relay closes.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let writer = self.writer.lock().await.take();
        self.connected.store(false, Ordering::SeqCst);

        let Some(writer) = writer else {
            return Err(ClientError::NotConnected);
        };
        // Every send flushes, so nothing is left buffered in the codec.
        writer
            .into_inner()
            .shutdown()
            .await
            .map_err(CodecError::Io)?;
        tracing::info!("Disconnected from {}:{}", self.config.host, self.config.port);
        Ok(())
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        let receiver = self
            .receiver
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = receiver.take() {
            task.abort();
        }
    }
}

async fn receive_loop<R, F>(
    mut reader: FramedRead<R, MessageCodec>,
    connected: Arc<AtomicBool>,
    download_dir: Option<PathBuf>,
    mut on_event: F,
) where
    R: AsyncRead + Unpin,
    F: FnMut(ClientEvent),
{
    let reason = loop {
        match reader.next().await {
            Some(Ok(Frame::Message(Message::FileFrom(file)))) => {
                let Some(dir) = &download_dir else {
                    on_event(ClientEvent::Message(Message::FileFrom(file)));
                    continue;
                };
                let saved = save_received(dir, &file).await;
                let (from, from_ip, name) =
                    (file.from.clone(), file.from_ip.clone(), file.filename.clone());
                on_event(ClientEvent::Message(Message::FileFrom(file)));
                match saved {
                    Ok(path) => on_event(ClientEvent::FileSaved {
                        from,
                        from_ip,
                        path,
                    }),
                    Err(reason) => {
                        tracing::warn!("Could not save {:?}: {}", name, reason);
                        on_event(ClientEvent::FileSaveFailed {
                            filename: name,
                            reason,
                        });
                    }
                }
            }
            Some(Ok(Frame::Message(message))) => on_event(ClientEvent::Message(message)),
            Some(Ok(Frame::UnknownKind(kind))) => on_event(ClientEvent::Unrecognized { kind }),
            Some(Ok(Frame::Invalid { kind, reason })) => {
                tracing::debug!("Relay sent invalid {}: {}", kind, reason);
                on_event(ClientEvent::Unrecognized {
                    kind: Some(kind.to_string()),
                });
            }
            Some(Err(e)) => break e.to_string(),
            None => break "connection closed by relay".to_string(),
        }
    };

    connected.store(false, Ordering::SeqCst);
    tracing::info!("Receive loop ended: {}", reason);
    on_event(ClientEvent::Disconnected { reason });
}

/// Write a relayed payload as `received_<basename>` under `dir`.
async fn save_received(dir: &Path, file: &FileFrom) -> Result<PathBuf, String> {
    let name = filename::prefixed_name(RECEIVED_PREFIX, &file.filename)
        .ok_or_else(|| format!("unusable file name {:?}", file.filename))?;
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| format!("{}: {e}", dir.display()))?;

    let path = dir.join(name);
    tokio::fs::write(&path, file.payload.as_bytes())
        .await
        .map_err(|e| format!("{}: {e}", path.display()))?;
    tracing::info!(
        "Saved file from {}@{} to {}",
        file.from,
        file.from_ip,
        path.display()
    );
    Ok(path)
}
