//! Rate limiting for relay-server.
//!
//! Provides protection against connection flooding and message spam.
//! Both limiters are keyed by the peer's IP address, the same key the
//! registry routes on, using governor's keyed rate limiters backed by DashMap.

use crate::config::LimitsConfig;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Rate limiters for the relay server.
#[derive(Clone)]
pub struct RateLimits {
    /// Limits connection attempts per address.
    connection_limiter: Arc<KeyedLimiter<IpAddr>>,

    /// Limits inbound messages per address. Absent when unlimited.
    message_limiter: Option<Arc<KeyedLimiter<IpAddr>>>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("connection_keys", &self.connection_limiter.len())
            .field("message_keys", &self.message_keys_count())
            .finish()
    }
}

impl RateLimits {
    /// Create rate limiters from configuration.
    ///
    /// Zero quotas are rejected by [`Config::validate`](crate::config::Config::validate);
    /// if one slips through it is raised to one per minute. Messages are
    /// only limited when `messages_per_minute` is set.
    pub fn new(config: &LimitsConfig) -> Self {
        let connections = NonZeroU32::new(config.connections_per_ip).unwrap_or(NonZeroU32::MIN);
        let message_limiter = config.messages_per_minute.map(|per_minute| {
            let messages = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);
            Arc::new(RateLimiter::keyed(Quota::per_minute(messages)))
        });

        Self {
            connection_limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(connections))),
            message_limiter,
        }
    }

    /// Check if a connection attempt from `ip` is allowed.
    pub fn check_connection(&self, ip: IpAddr) -> Result<(), RateLimitError> {
        self.connection_limiter
            .check_key(&ip.to_canonical())
            .map_err(|_| RateLimitError::ConnectionLimitExceeded)
    }

    /// Check if one more message from `ip` is allowed.
    pub fn check_message(&self, ip: IpAddr) -> Result<(), RateLimitError> {
        match &self.message_limiter {
            Some(limiter) => limiter
                .check_key(&ip.to_canonical())
                .map_err(|_| RateLimitError::MessageLimitExceeded),
            None => Ok(()),
        }
    }

    /// Get the number of tracked connection keys (for metrics).
    pub fn connection_keys_count(&self) -> usize {
        self.connection_limiter.len()
    }

    /// Get the number of tracked message keys (for metrics).
    pub fn message_keys_count(&self) -> usize {
        self.message_limiter.as_ref().map_or(0, |limiter| limiter.len())
    }

    /// Evict entries whose quota has fully recharged.
    pub fn shrink(&self) {
        self.connection_limiter.retain_recent();
        if let Some(limiter) = &self.message_limiter {
            limiter.retain_recent();
        }
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// Too many connection attempts from this address.
    #[error("connection rate limit exceeded")]
    ConnectionLimitExceeded,
    /// Too many messages from this address.
    #[error("message rate limit exceeded")]
    MessageLimitExceeded,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn limits(connections_per_ip: u32, messages_per_minute: u32) -> RateLimits {
        let mut config = Config::default().limits;
        config.connections_per_ip = connections_per_ip;
        config.messages_per_minute = Some(messages_per_minute);
        RateLimits::new(&config)
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn create_rate_limits() {
        let limits = limits(5, 10);
        assert_eq!(limits.connection_keys_count(), 0);
        assert_eq!(limits.message_keys_count(), 0);
    }

    #[test]
    fn messages_are_unlimited_by_default() {
        let limits = RateLimits::new(&Config::default().limits);
        let peer = ip("10.0.0.5");

        for _ in 0..5_000 {
            assert!(limits.check_message(peer).is_ok());
        }
        assert_eq!(limits.message_keys_count(), 0);
    }

    #[test]
    fn connection_limit_allows_within_quota() {
        let limits = limits(5, 100);
        let peer = ip("10.0.0.5");

        for _ in 0..5 {
            assert!(limits.check_connection(peer).is_ok());
        }

        assert_eq!(
            limits.check_connection(peer),
            Err(RateLimitError::ConnectionLimitExceeded)
        );
    }

    #[test]
    fn message_limit_allows_within_quota() {
        let limits = limits(100, 5);
        let peer = ip("10.0.0.5");

        for _ in 0..5 {
            assert!(limits.check_message(peer).is_ok());
        }

        assert_eq!(
            limits.check_message(peer),
            Err(RateLimitError::MessageLimitExceeded)
        );
    }

    #[test]
    fn different_addresses_have_independent_limits() {
        let limits = limits(2, 2);
        let a = ip("10.0.0.5");
        let b = ip("10.0.0.9");

        assert!(limits.check_message(a).is_ok());
        assert!(limits.check_message(a).is_ok());
        assert!(limits.check_message(a).is_err());

        assert!(limits.check_message(b).is_ok());
        assert!(limits.check_message(b).is_ok());
        assert!(limits.check_message(b).is_err());
    }

    #[test]
    fn mapped_ipv6_shares_the_ipv4_quota() {
        let limits = limits(100, 1);
        assert!(limits.check_message(ip("10.0.0.5")).is_ok());
        assert!(limits.check_message(ip("::ffff:10.0.0.5")).is_err());
    }

    #[test]
    fn zero_quota_is_raised_to_one() {
        let limits = limits(0, 0);
        assert!(limits.check_connection(ip("10.0.0.5")).is_ok());
        assert!(limits.check_connection(ip("10.0.0.5")).is_err());
    }

    #[test]
    fn rate_limits_are_debug() {
        let limits = limits(5, 10);
        let debug = format!("{:?}", limits);
        assert!(debug.contains("RateLimits"));
    }

    #[test]
    fn shrink_does_not_panic() {
        let limits = limits(5, 10);
        let _ = limits.check_connection(ip("10.0.0.5"));
        let _ = limits.check_message(ip("10.0.0.9"));
        assert!(limits.connection_keys_count() > 0);
        limits.shrink();
    }
}
