//! Prometheus metrics endpoint.

use crate::server::Relay;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::fmt::Write;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Gauges describe current state; counters are monotonic since startup.
pub async fn metrics_handler(Extension(relay): Extension<Arc<Relay>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        render(&relay),
    )
}

fn render(relay: &Relay) -> String {
    let m = relay.metrics();
    let gauges = [
        (
            "sessions_active",
            "Number of registered sessions",
            relay.total_sessions() as u64,
        ),
        (
            "addresses_active",
            "Number of distinct peer addresses",
            relay.total_addresses() as u64,
        ),
        (
            "message_limit_keys",
            "Addresses tracked by the message rate limiter",
            relay.rate_limits().message_keys_count() as u64,
        ),
        (
            "connection_limit_keys",
            "Addresses tracked by the connection rate limiter",
            relay.rate_limits().connection_keys_count() as u64,
        ),
    ];
    let counters = [
        (&m.connections_total, "connections_total", "Connections admitted to the TLS handshake"),
        (&m.handshake_failures, "handshake_failures_total", "TLS handshakes that failed or timed out"),
        (&m.messages_relayed, "messages_relayed_total", "MSG records delivered to sessions"),
        (&m.files_stored, "files_stored_total", "Broadcast files written to storage"),
        (&m.files_relayed, "files_relayed_total", "FILE_FROM records delivered to sessions"),
        (&m.bytes_received, "bytes_received_total", "Payload bytes received in MSG and FILE records"),
        (&m.rate_limit_hits, "rate_limit_hits_total", "Connections and messages refused by rate limits"),
        (&m.errors_total, "errors_total", "ERR replies and sessions closed on framing errors"),
    ];

    let mut body = String::new();
    for (name, help, value) in gauges {
        let _ = writeln!(
            body,
            "# HELP tls_relay_{name} {help}\n# TYPE tls_relay_{name} gauge\ntls_relay_{name} {value}\n"
        );
    }
    let _ = writeln!(
        body,
        "# HELP tls_relay_info Server information\n# TYPE tls_relay_info gauge\ntls_relay_info{{version=\"{}\"}} 1\n",
        env!("CARGO_PKG_VERSION")
    );
    for (counter, name, help) in counters {
        let value = counter.load(Ordering::Relaxed);
        let _ = writeln!(
            body,
            "# HELP tls_relay_{name} {help}\n# TYPE tls_relay_{name} counter\ntls_relay_{name} {value}\n"
        );
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::MemoryStore;

    #[test]
    fn every_series_has_help_and_type() {
        let relay = Relay::new(Config::default(), Arc::new(MemoryStore::new()));
        relay.metrics().errors_total.fetch_add(2, Ordering::Relaxed);

        let text = render(&relay);
        assert!(text.contains("# TYPE tls_relay_sessions_active gauge"));
        assert!(text.contains("# TYPE tls_relay_handshake_failures_total counter"));
        assert!(text.contains("tls_relay_errors_total 2"));
        assert!(text.contains("tls_relay_info{version=\""));

        let samples = text
            .lines()
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .count();
        let types = text.lines().filter(|l| l.starts_with("# TYPE")).count();
        assert_eq!(samples, types);
    }

    #[test]
    fn limiter_keys_are_reported() {
        let relay = Relay::new(Config::default(), Arc::new(MemoryStore::new()));
        let _ = relay.rate_limits().check_connection("10.0.0.5".parse().unwrap());

        let text = render(&relay);
        assert!(text.contains("tls_relay_connection_limit_keys 1"));
        assert!(text.contains("tls_relay_message_limit_keys 0"));
    }
}
