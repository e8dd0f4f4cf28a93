//! relay-server binary entry point.
//!
//! Usage:
//! ```bash
//! relay-server --config relay.toml
//! relay-server --help
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tls_relay_server::{http, Config, FsStore, RelayServer};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// TLS message and file relay server.
#[derive(Parser, Debug)]
#[command(name = "relay-server")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, short, default_value = "relay.toml")]
    config: PathBuf,

    /// Log at debug level when RUST_LOG is not set
    #[arg(long, short)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { "info" })
    });

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let store = Arc::new(FsStore::new(&config.storage.directory));
    let http_config = config.http.clone();

    let server = RelayServer::bind(config, store)
        .await
        .context("starting relay listener")?;

    if http_config.enabled {
        let listener = tokio::net::TcpListener::bind(&http_config.bind_address)
            .await
            .with_context(|| format!("binding HTTP endpoints on {}", http_config.bind_address))?;
        let relay = server.relay();
        tokio::spawn(async move {
            if let Err(e) = http::serve(listener, relay).await {
                tracing::error!("HTTP server failed: {}", e);
            }
        });
    }

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
        .context("relay server failed")?;

    tracing::info!("Relay stopped");
    Ok(())
}
