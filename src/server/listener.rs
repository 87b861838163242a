//! Ingest listener
//!
//! Accepts inbound publishes over TCP and hands each one to the relay.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::error::{Error, Result};
use crate::relay::Relay;
use crate::server::config::ServerConfig;
use crate::transport::tcp;

/// Inbound publish server
pub struct IngestServer {
    config: ServerConfig,
    relay: Relay,
    next_connection_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl IngestServer {
    /// Create a new server with the given configuration and relay
    pub fn new(config: ServerConfig, relay: Relay) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            relay,
            next_connection_id: AtomicU64::new(1),
            connection_semaphore,
        }
    }

    /// Get a reference to the relay
    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Run the server
    ///
    /// This method blocks until the listener fails to bind.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Ingest server listening");

        self.accept_loop(&listener).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Ingest server listening");

        self.serve_until(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve_until<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        }
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(connection_id, peer = %peer_addr, "New connection");

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        let relay = self.relay.clone();
        let timeout = self.config.connection_timeout;

        tokio::spawn(async move {
            let _permit = permit;

            let origin = match tokio::time::timeout(timeout, tcp::accept(socket)).await {
                Ok(Ok(origin)) => origin,
                Ok(Err(e)) => {
                    tracing::debug!(connection_id, error = %e, "Rejected publish");
                    return;
                }
                Err(_) => {
                    tracing::debug!(connection_id, "Publish header timed out");
                    return;
                }
            };

            match relay.publish(origin).await {
                Ok(ingest) => {
                    // Holds the connection slot for as long as the origin is read
                    if let Err(e) = ingest.await {
                        tracing::error!(connection_id, error = %e, "Ingest task failed");
                    }
                }
                Err(Error::Registry(e)) => {
                    tracing::info!(connection_id, peer = %peer_addr, error = %e, "Publish refused");
                }
                Err(e) => {
                    tracing::warn!(connection_id, error = %e, "Publish failed");
                }
            }

            tracing::debug!(connection_id, "Connection closed");
        });
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}
