//! Relay state and the TCP accept loop.
//!
//! [`Relay`] owns everything sessions share. [`RelayServer`] binds the
//! listener and hands each accepted stream to its own task.

use crate::config::Config;
use crate::error::Result;
use crate::limits::RateLimits;
use crate::protocol;
use crate::registry::Registry;
use crate::storage::ArtifactStore;
use crate::tls::TlsIdentity;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_rustls::TlsAcceptor;

/// How often idle rate limiter entries are evicted.
const LIMITER_SHRINK_INTERVAL: Duration = Duration::from_secs(300);

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Connections that passed admission and started a handshake.
    pub connections_total: AtomicU64,
    /// TLS handshakes that failed or timed out.
    pub handshake_failures: AtomicU64,
    /// MSG records delivered to a session.
    pub messages_relayed: AtomicU64,
    /// Broadcast files written to storage.
    pub files_stored: AtomicU64,
    /// FILE_FROM records delivered to a session.
    pub files_relayed: AtomicU64,
    /// Payload bytes received in MSG and FILE records.
    pub bytes_received: AtomicU64,
    /// Connections and messages refused by a rate limit.
    pub rate_limit_hits: AtomicU64,
    /// ERR replies sent plus sessions closed on a framing error.
    pub errors_total: AtomicU64,
}

/// Shared state of a running relay.
pub struct Relay {
    config: Config,
    registry: Registry,
    store: Arc<dyn ArtifactStore>,
    rate_limits: RateLimits,
    admission: Arc<Semaphore>,
    metrics: RelayMetrics,
    started: Instant,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl Relay {
    /// Create relay state with the given config and artifact store.
    pub fn new(config: Config, store: Arc<dyn ArtifactStore>) -> Self {
        let rate_limits = RateLimits::new(&config.limits);
        let slots = config
            .limits
            .max_concurrent_sessions
            .min(Semaphore::MAX_PERMITS);
        Self {
            config,
            registry: Registry::new(),
            store,
            rate_limits,
            admission: Arc::new(Semaphore::new(slots)),
            metrics: RelayMetrics::default(),
            started: Instant::now(),
        }
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Get the artifact store.
    pub fn store(&self) -> &dyn ArtifactStore {
        self.store.as_ref()
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Claim one of the `max_concurrent_sessions` slots.
    ///
    /// The slot is held from before the handshake until the session ends,
    /// so connections still handshaking count against the cap.
    pub fn try_admit(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.admission).try_acquire_owned().ok()
    }

    /// Connections currently holding an admission slot.
    pub fn admitted_connections(&self) -> usize {
        self.config
            .limits
            .max_concurrent_sessions
            .min(Semaphore::MAX_PERMITS)
            - self.admission.available_permits()
    }

    /// Registered sessions across all addresses.
    pub fn total_sessions(&self) -> usize {
        self.registry.session_count()
    }

    /// Distinct addresses with at least one session.
    pub fn total_addresses(&self) -> usize {
        self.registry.address_count()
    }

    /// Time since the relay state was created.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

/// A bound TLS relay listener.
pub struct RelayServer {
    relay: Arc<Relay>,
    listener: TcpListener,
    acceptor: TlsAcceptor,
}

impl std::fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayServer")
            .field("relay", &self.relay)
            .field("local_addr", &self.listener.local_addr().ok())
            .finish_non_exhaustive()
    }
}

impl RelayServer {
    /// Load the certificate and key named in `config` and bind the listener.
    pub async fn bind(config: Config, store: Arc<dyn ArtifactStore>) -> Result<Self> {
        let identity =
            TlsIdentity::from_files(&config.server.cert_path, &config.server.key_path);
        Self::bind_with_identity(config, store, &identity).await
    }

    /// Bind using an explicit TLS identity instead of the configured paths.
    pub async fn bind_with_identity(
        config: Config,
        store: Arc<dyn ArtifactStore>,
        identity: &TlsIdentity,
    ) -> Result<Self> {
        config.validate()?;
        let acceptor = identity.load_acceptor()?;
        let listener = TcpListener::bind(&config.server.bind_address).await?;

        tracing::info!(
            "Relay listening on {} (storage: {})",
            listener.local_addr()?,
            config.storage.directory.display()
        );

        Ok(Self {
            relay: Arc::new(Relay::new(config, store)),
            listener,
            acceptor,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared relay state.
    pub fn relay(&self) -> Arc<Relay> {
        Arc::clone(&self.relay)
    }

    /// Accept connections forever.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Accept connections until `shutdown` completes.
    ///
    /// Sessions already running are left to finish on their own tasks.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut shrink = tokio::time::interval(LIMITER_SHRINK_INTERVAL);
        shrink.tick().await;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                _ = shrink.tick() => {
                    self.relay.rate_limits().shrink();
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let relay = Arc::clone(&self.relay);
                        let acceptor = self.acceptor.clone();
                        tokio::spawn(protocol::handle_connection(relay, acceptor, stream, peer));
                    }
                    Err(e) => {
                        // Usually fd exhaustion; back off instead of spinning.
                        tracing::warn!("Accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }

        Ok(())
    }
}
