//! Connection registry: which sessions are reachable at which address.
//!
//! Sessions are bucketed by canonical peer IP in registration order. The map
//! sits behind one `std::sync::Mutex` that is only held to mutate or snapshot
//! it; every network write happens after the lock is released.

use crate::error::SendError;
use bytes::Bytes;
use futures_util::future::join_all;
use relay_types::{encode, Message};
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Process-unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The write side of one connected session.
///
/// Writes are serialized by an async mutex so records from concurrent
/// senders never interleave.
pub struct SessionHandle {
    id: SessionId,
    peer: SocketAddr,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Remote socket address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Routing key: the peer IP with IPv4-mapped IPv6 unwrapped.
    pub fn ip(&self) -> IpAddr {
        self.peer.ip().to_canonical()
    }

    /// Encode and write one message.
    pub async fn send(&self, message: &Message) -> Result<(), SendError> {
        let bytes = encode(message).map_err(SendError::Encode)?;
        self.send_encoded(&bytes).await
    }

    /// Write one already-encoded record and flush it.
    pub async fn send_encoded(&self, record: &Bytes) -> Result<(), SendError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(SendError::Closed)?;
        writer.write_all(record).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Shut the writer down. Later sends fail with [`SendError::Closed`].
    pub async fn close(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!("Session {} shutdown: {}", self.id, e);
            }
        }
    }

    /// Whether [`close`](Self::close) has run.
    pub async fn is_closed(&self) -> bool {
        self.writer.lock().await.is_none()
    }
}

/// Shared routing table of live sessions.
#[derive(Clone, Default)]
pub struct Registry {
    buckets: Arc<Mutex<HashMap<IpAddr, Vec<Arc<SessionHandle>>>>>,
    next_id: Arc<AtomicU64>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("sessions", &self.session_count())
            .field("addresses", &self.address_count())
            .finish()
    }
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<IpAddr, Vec<Arc<SessionHandle>>>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Build a handle for a freshly accepted connection.
    ///
    /// The handle is not routable until [`register`](Self::register) is called.
    pub fn new_handle<W>(&self, peer: SocketAddr, writer: W) -> Arc<SessionHandle>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        Arc::new(SessionHandle {
            id,
            peer,
            writer: tokio::sync::Mutex::new(Some(Box::new(writer))),
        })
    }

    /// Add a session to the bucket for its address.
    ///
    /// The returned guard removes it again when dropped.
    pub fn register(&self, handle: Arc<SessionHandle>) -> Registration {
        let ip = handle.ip();
        let count = {
            let mut buckets = self.lock();
            let bucket = buckets.entry(ip).or_default();
            bucket.push(Arc::clone(&handle));
            bucket.len()
        };

        tracing::debug!(
            "Registered session {} at {} ({} at this address)",
            handle.id,
            ip,
            count
        );

        Registration {
            registry: self.clone(),
            handle,
        }
    }

    /// Remove a session. Returns false if it was not registered.
    pub fn unregister(&self, handle: &SessionHandle) -> bool {
        let ip = handle.ip();
        let mut buckets = self.lock();

        let Some(bucket) = buckets.get_mut(&ip) else {
            return false;
        };
        let Some(pos) = bucket.iter().position(|h| h.id == handle.id) else {
            return false;
        };
        bucket.remove(pos);
        if bucket.is_empty() {
            buckets.remove(&ip);
        }
        true
    }

    /// Send `message` to every registered session except `exclude`.
    ///
    /// Returns how many sessions it was delivered to. Failed sends are
    /// logged and skipped; the failing session stays registered.
    pub async fn broadcast(&self, message: &Message, exclude: Option<SessionId>) -> usize {
        let targets: Vec<Arc<SessionHandle>> = self
            .lock()
            .values()
            .flatten()
            .filter(|h| Some(h.id) != exclude)
            .cloned()
            .collect();

        deliver(&targets, message).await
    }

    /// Send `message` to every session registered at `ip`.
    ///
    /// Returns true if at least one session received it.
    pub async fn send_to_address(&self, ip: IpAddr, message: &Message) -> bool {
        self.deliver_to_address(ip, message).await > 0
    }

    /// Like [`send_to_address`](Self::send_to_address), returning how many
    /// sessions received the message.
    pub async fn deliver_to_address(&self, ip: IpAddr, message: &Message) -> usize {
        let targets = self.sessions_at(ip);
        deliver(&targets, message).await
    }

    /// Total registered sessions.
    pub fn session_count(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    /// Number of distinct addresses with at least one session.
    pub fn address_count(&self) -> usize {
        self.lock().len()
    }

    /// Snapshot of the sessions registered at `ip`, in registration order.
    pub fn sessions_at(&self, ip: IpAddr) -> Vec<Arc<SessionHandle>> {
        self.lock()
            .get(&ip.to_canonical())
            .cloned()
            .unwrap_or_default()
    }
}

/// Encode once and write to all targets concurrently.
async fn deliver(targets: &[Arc<SessionHandle>], message: &Message) -> usize {
    if targets.is_empty() {
        return 0;
    }

    let record = match encode(message) {
        Ok(record) => record,
        Err(e) => {
            tracing::error!("Failed to encode {} for delivery: {}", message.kind(), e);
            return 0;
        }
    };

    let results = join_all(targets.iter().map(|handle| {
        let record = &record;
        async move {
            let result = handle.send_encoded(record).await;
            if let Err(e) = &result {
                tracing::debug!("Delivery to session {} ({}) failed: {}", handle.id, handle.peer, e);
            }
            result.is_ok()
        }
    }))
    .await;

    results.into_iter().filter(|delivered| *delivered).count()
}

/// Keeps a session registered for as long as it is alive.
///
/// Dropping it unregisters the session, whichever way the owning task ends.
#[must_use = "dropping the registration unregisters the session"]
#[derive(Debug)]
pub struct Registration {
    registry: Registry,
    handle: Arc<SessionHandle>,
}

impl Registration {
    /// The registered session.
    pub fn handle(&self) -> &Arc<SessionHandle> {
        &self.handle
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.registry.unregister(&self.handle) {
            tracing::debug!(
                "Unregistered session {} at {}",
                self.handle.id,
                self.handle.ip()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_types::{Frame, Target};
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn handle(registry: &Registry, peer: &str) -> (Arc<SessionHandle>, BufReader<DuplexStream>) {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        (registry.new_handle(addr(peer), ours), BufReader::new(theirs))
    }

    async fn read_message(reader: &mut BufReader<DuplexStream>) -> Message {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        match relay_types::decode_line(line.trim_end().as_bytes()).unwrap() {
            Frame::Message(m) => m,
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn register_and_unregister() {
        let registry = Registry::new();
        let (a, _ra) = handle(&registry, "10.0.0.5:4000");
        let (b, _rb) = handle(&registry, "10.0.0.5:4001");
        let (c, _rc) = handle(&registry, "10.0.0.9:4000");

        let reg_a = registry.register(a.clone());
        let reg_b = registry.register(b.clone());
        let reg_c = registry.register(c.clone());

        assert_eq!(registry.session_count(), 3);
        assert_eq!(registry.address_count(), 2);
        let at = registry.sessions_at("10.0.0.5".parse().unwrap());
        assert_eq!(at.iter().map(|h| h.id()).collect::<Vec<_>>(), vec![a.id(), b.id()]);

        drop(reg_a);
        assert_eq!(registry.session_count(), 2);
        drop(reg_b);
        assert_eq!(registry.address_count(), 1);
        assert!(registry.sessions_at("10.0.0.5".parse().unwrap()).is_empty());
        drop(reg_c);
        assert_eq!(registry.session_count(), 0);
        assert_eq!(registry.address_count(), 0);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = Registry::new();
        let (a, _ra) = handle(&registry, "10.0.0.5:4000");
        let reg = registry.register(a.clone());

        assert!(registry.unregister(&a));
        assert!(!registry.unregister(&a));
        drop(reg);
        assert_eq!(registry.session_count(), 0);
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let registry = Registry::new();
        let (a, _ra) = handle(&registry, "10.0.0.5:4000");
        let (b, _rb) = handle(&registry, "10.0.0.5:4000");
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn broadcast_reaches_everyone_except_excluded() {
        let registry = Registry::new();
        let (a, mut ra) = handle(&registry, "10.0.0.5:4000");
        let (b, mut rb) = handle(&registry, "10.0.0.9:4000");
        let _reg_a = registry.register(a.clone());
        let _reg_b = registry.register(b.clone());

        let msg = Message::ack(&Target::Broadcast);
        assert_eq!(registry.broadcast(&msg, None).await, 2);
        assert_eq!(read_message(&mut ra).await, msg);
        assert_eq!(read_message(&mut rb).await, msg);

        let msg = Message::pong();
        assert_eq!(registry.broadcast(&msg, Some(a.id())).await, 1);
        assert_eq!(read_message(&mut rb).await, msg);
    }

    #[tokio::test]
    async fn broadcast_to_empty_registry_delivers_nothing() {
        let registry = Registry::new();
        assert_eq!(registry.broadcast(&Message::pong(), None).await, 0);
    }

    #[tokio::test]
    async fn send_to_address_fans_out_within_bucket() {
        let registry = Registry::new();
        let (a, mut ra) = handle(&registry, "10.0.0.5:4000");
        let (b, mut rb) = handle(&registry, "10.0.0.5:4001");
        let (c, _rc) = handle(&registry, "10.0.0.9:4000");
        let _regs = [
            registry.register(a),
            registry.register(b),
            registry.register(c),
        ];

        let msg = Message::error("hello bucket");
        assert!(registry.send_to_address("10.0.0.5".parse().unwrap(), &msg).await);
        assert_eq!(read_message(&mut ra).await, msg);
        assert_eq!(read_message(&mut rb).await, msg);

        assert!(!registry.send_to_address("10.0.0.77".parse().unwrap(), &msg).await);
    }

    #[tokio::test]
    async fn mapped_ipv6_peer_shares_ipv4_bucket() {
        let registry = Registry::new();
        let (a, _ra) = handle(&registry, "[::ffff:10.0.0.5]:4000");
        let _reg = registry.register(a);
        assert_eq!(registry.sessions_at("10.0.0.5".parse().unwrap()).len(), 1);
    }

    #[tokio::test]
    async fn closed_handle_is_skipped_not_removed() {
        let registry = Registry::new();
        let (a, _ra) = handle(&registry, "10.0.0.5:4000");
        let (b, mut rb) = handle(&registry, "10.0.0.9:4000");
        let _reg_a = registry.register(a.clone());
        let _reg_b = registry.register(b);

        a.close().await;
        assert!(a.is_closed().await);
        assert!(matches!(a.send(&Message::pong()).await, Err(SendError::Closed)));

        let msg = Message::pong();
        assert_eq!(registry.broadcast(&msg, None).await, 1);
        assert_eq!(read_message(&mut rb).await, msg);
        assert_eq!(registry.session_count(), 2);
    }

    #[tokio::test]
    async fn dropped_peer_fails_only_its_own_send() {
        let registry = Registry::new();
        let (a, ra) = handle(&registry, "10.0.0.5:4000");
        let (b, mut rb) = handle(&registry, "10.0.0.9:4000");
        let _reg_a = registry.register(a);
        let _reg_b = registry.register(b);

        drop(ra);
        let msg = Message::pong();
        assert_eq!(registry.broadcast(&msg, None).await, 1);
        assert_eq!(read_message(&mut rb).await, msg);
    }
}
