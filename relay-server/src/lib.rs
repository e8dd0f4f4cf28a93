//! # relay-server
//!
//! TLS message and file relay.
//!
//! This crate implements a relay server that:
//! - Accepts TLS connections from any number of clients
//! - Relays chat messages to every session or to the sessions at one address
//! - Stores broadcast file uploads and forwards addressed ones
//! - Keeps no message history: a peer that is not connected misses the record
//!
//! ## Architecture
//!
//! ```text
//! Client A ──┐                         ┌── Client B
//!            │   TLS, one JSON record  │
//!            ├────── per line ────────►│
//!            │                         │
//!        ┌───┴─────────────────────────┴───┐
//!        │          relay-server           │
//!        │  ┌──────────┐  ┌─────────────┐  │
//!        │  │ registry │  │  artifacts  │  │
//!        │  │ (by IP)  │  │ (FILE "*")  │  │
//!        │  └──────────┘  └─────────────┘  │
//!        └─────────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! - LOGIN → OK
//! - MSG → ACK (relayed as MSG with `from`/`from_ip`)
//! - FILE → ACK_FILE (stored, or relayed as FILE_FROM)
//! - PING → PONG
//! - anything else → ERR

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod http;
pub mod limits;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod storage;
pub mod tls;

pub use config::Config;
pub use error::{RelayError, Result};
pub use registry::{Registration, Registry, SessionHandle, SessionId};
pub use server::{Relay, RelayMetrics, RelayServer};
pub use session::{CloseReason, Session, SessionState};
pub use storage::{artifact_name, ArtifactStore, FsStore, MemoryStore};
pub use tls::TlsIdentity;
