//! Gametable server binary.
//!
//! # Usage
//!
//! ```bash
//! # In-memory documents (development)
//! gametable-server --bind 0.0.0.0:9090
//!
//! # Durable documents (production)
//! gametable-server --bind 0.0.0.0:9090 --db /var/lib/gametable/documents.redb
//! ```

use std::time::Duration;

use clap::Parser;
use gametable_server::{
    CoordinatorConfig, MemoryStore, RedbStore, Server, ServerRuntimeConfig,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Gametable session coordinator
#[derive(Parser, Debug)]
#[command(name = "gametable-server")]
#[command(about = "Realtime tabletop session coordinator")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:9090")]
    bind: String,

    /// Path to the redb document database. Omit for in-memory documents.
    #[arg(long)]
    db: Option<String>,

    /// Seconds a disconnected player's session survives before eviction
    #[arg(long, default_value = "60")]
    disconnect_grace_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("gametable server starting");
    tracing::info!("binding to {}", args.bind);

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        coordinator: CoordinatorConfig {
            disconnect_grace: Duration::from_secs(args.disconnect_grace_secs),
            ..CoordinatorConfig::default()
        },
    };

    match args.db {
        Some(path) => {
            tracing::info!("using redb document store at {path}");
            let store = RedbStore::open(&path)?;
            let server = Server::bind(config, store).await?;
            tracing::info!("server listening on {}", server.local_addr()?);
            server.run().await?;
        },
        None => {
            tracing::warn!("no --db given, documents will not survive a restart");
            let server = Server::bind(config, MemoryStore::new()).await?;
            tracing::info!("server listening on {}", server.local_addr()?);
            server.run().await?;
        },
    }

    Ok(())
}
