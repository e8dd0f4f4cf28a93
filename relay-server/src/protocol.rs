//! Connection admission and the TLS handshake.
//!
//! Runs on the task spawned for each accepted TCP stream, before any
//! protocol record is read.

use crate::error::{ProtocolError, ProtocolResult};
use crate::server::Relay;
use crate::session::Session;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

/// Admit, secure and serve one accepted connection.
///
/// Connections refused by a rate limit or the session cap are dropped
/// before the handshake. Handshake failures are logged and counted; the
/// client is never retried.
pub async fn handle_connection<IO>(
    relay: Arc<Relay>,
    acceptor: TlsAcceptor,
    stream: IO,
    peer: SocketAddr,
) where
    IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    if let Err(e) = relay.rate_limits().check_connection(peer.ip()) {
        tracing::warn!("Connection from {} rate limited: {}", peer, e);
        relay.metrics().rate_limit_hits.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let Some(_slot) = relay.try_admit() else {
        tracing::warn!(
            "Session limit reached ({}), rejecting {}",
            relay.config().limits.max_concurrent_sessions,
            peer
        );
        return;
    };

    relay.metrics().connections_total.fetch_add(1, Ordering::Relaxed);

    let tls = match handshake(&relay, &acceptor, stream).await {
        Ok(tls) => tls,
        Err(e) => {
            relay.metrics().handshake_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("TLS handshake with {} failed: {}", peer, e);
            return;
        }
    };

    tracing::info!("Secure channel established with {}", peer);
    Session::start(relay, tls, peer).run().await;
}

async fn handshake<IO>(
    relay: &Relay,
    acceptor: &TlsAcceptor,
    stream: IO,
) -> ProtocolResult<TlsStream<IO>>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let secs = relay.config().server.handshake_timeout_secs;
    match tokio::time::timeout(Duration::from_secs(secs), acceptor.accept(stream)).await {
        Ok(Ok(tls)) => Ok(tls),
        Ok(Err(e)) => Err(ProtocolError::Handshake(e.to_string())),
        Err(_) => Err(ProtocolError::HandshakeTimeout(secs)),
    }
}
