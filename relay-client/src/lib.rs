//! # relay-client
//!
//! Client library for the tls-relay protocol.
//!
//! ## Features
//!
//! - **Verified TLS**: the server certificate must chain to one configured issuer
//! - **Callback delivery**: a background task hands every relay record to your closure
//! - **Broadcast or addressed**: messages and files go to everyone or to one peer address
//! - **Downloads**: relayed files can be saved as `received_<name>` in a chosen directory
//!
//! ## Example
//!
//! ```ignore
//! use relay_client::{ClientConfig, RelayClient, TrustAnchor};
//! use relay_types::Target;
//!
//! let config = ClientConfig::new("127.0.0.1", 5000, "alice", TrustAnchor::from_file("ca.crt"));
//! let client = RelayClient::new(config);
//! client.connect(|event| println!("{event:?}")).await?;
//! client.send_message("hello", &Target::Broadcast).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod transport;

pub use client::{ClientConfig, ClientError, ClientEvent, RelayClient, RECEIVED_PREFIX};
pub use transport::{connect_tls, TransportError, TrustAnchor};
