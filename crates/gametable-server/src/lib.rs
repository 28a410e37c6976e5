//! Gametable production server.
//!
//! Runtime glue around [`gametable_core`]'s pure coordination logic: Tokio
//! for the async runtime, a length-prefixed CBOR framing over TCP, and
//! system time with cryptographic RNG.
//!
//! # Components
//!
//! - [`Coordinator`]: routes client events and fans results out to rooms
//! - [`Server`]: accept loop wiring connections to the coordinator
//! - [`TcpTransport`]: TCP listener and frame codec
//! - [`SystemEnv`]: production environment (real time, crypto RNG)
//! - [`storage`]: document store trait with memory and redb backends

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod coordinator;
mod error;
pub mod storage;
mod system_env;
mod transport;

use std::{sync::Arc, time::Duration};

pub use coordinator::{
    ACK_EXISTING_PLAYER, ACK_NEW_PLAYER, Coordinator, CoordinatorConfig, DEFAULT_AVATAR,
};
pub use error::ServerError;
use gametable_proto::ClientEvent;
pub use storage::{DocumentStore, FlakyStore, MemoryStore, RedbStore, StoreError};
pub use system_env::SystemEnv;
use tokio::sync::mpsc;
pub use transport::{MAX_FRAME_SIZE, TcpTransport, read_frame, write_frame};

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:9090")
    pub bind_address: String,
    /// Coordinator configuration (grace period, flush retries)
    pub coordinator: CoordinatorConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0:9090".to_string(), coordinator: CoordinatorConfig::default() }
    }
}

/// Production gametable server.
///
/// Wraps a [`Coordinator`] with the TCP transport and system environment.
/// Generic over the document store so the binary can pick memory or redb.
pub struct Server<S: DocumentStore> {
    coordinator: Arc<Coordinator<SystemEnv, S>>,
    transport: TcpTransport,
    grace: Duration,
}

impl<S: DocumentStore> Server<S> {
    /// Create and bind a new server over the given store.
    pub async fn bind(config: ServerRuntimeConfig, store: S) -> Result<Self, ServerError> {
        let env = SystemEnv::new();
        let grace = config.coordinator.disconnect_grace;
        let coordinator = Arc::new(Coordinator::new(env, store, config.coordinator));
        let transport = TcpTransport::bind(&config.bind_address).await?;

        Ok(Self { coordinator, transport, grace })
    }

    /// The coordinator backing this server.
    pub fn coordinator(&self) -> Arc<Coordinator<SystemEnv, S>> {
        Arc::clone(&self.coordinator)
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Run the server, accepting connections and processing events.
    ///
    /// This method runs until the server is shut down or an error occurs.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("server listening on {}", self.transport.local_addr()?);

        // Periodic sweep for sessions past their disconnect grace period.
        {
            let coordinator = Arc::clone(&self.coordinator);
            let period = (self.grace / 2).max(Duration::from_millis(100));
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                loop {
                    interval.tick().await;
                    coordinator.tick().await;
                }
            });
        }

        loop {
            match self.transport.accept().await {
                Ok((stream, addr)) => {
                    tracing::debug!(%addr, "connection accepted");
                    let coordinator = Arc::clone(&self.coordinator);

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, coordinator).await {
                            tracing::debug!(%addr, error = %e, "connection error");
                        }
                    });
                },
                Err(e) => {
                    tracing::error!(error = %e, "accept error");
                },
            }
        }
    }
}

/// Drive a single client connection.
///
/// The read half decodes events and feeds the coordinator; a writer task
/// drains the connection's outbound channel back onto the socket. Whatever
/// way the connection ends, the coordinator is told exactly once.
async fn handle_connection<S: DocumentStore>(
    stream: tokio::net::TcpStream,
    coordinator: Arc<Coordinator<SystemEnv, S>>,
) -> Result<(), ServerError> {
    let (mut reader, mut writer) = stream.into_split();

    let (sender, mut outbound) = mpsc::unbounded_channel();
    let connection_id = coordinator.register_connection(sender).await;

    let writer_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        while let Some(event) = outbound.recv().await {
            buf.clear();
            if let Err(e) = event.encode(&mut buf) {
                tracing::warn!(error = %e, "failed to encode outbound event");
                continue;
            }
            if write_frame(&mut writer, &buf).await.is_err() {
                // Socket gone; the read half will notice and tear down.
                break;
            }
        }
    });

    let result = loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };

        let event = match ClientEvent::decode(&frame) {
            Ok(event) => event,
            Err(e) => {
                // Undecodable input is a protocol violation; drop the
                // connection rather than guess.
                break Err(e.into());
            },
        };

        if let Err(e) = coordinator.handle_event(connection_id, event).await {
            break Err(e);
        }
    };

    coordinator.connection_closed(connection_id).await;
    writer_task.abort();

    result
}
