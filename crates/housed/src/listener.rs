//! Port listener: accepts peers dialing this device's role port.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::participator::Participator;

pub struct PortListener {
    listener: TcpListener,
    participator: Arc<Participator>,
    shutdown: broadcast::Receiver<()>,
}

impl PortListener {
    pub async fn bind(
        addr: SocketAddr,
        participator: Arc<Participator>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind port listener on {addr}"))?;
        Ok(Self {
            listener,
            participator,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("listener has no local address")
    }

    /// Each accepted stream is handshaken on its own task, so one slow peer
    /// cannot hold up the next.
    pub async fn run(mut self) -> Result<()> {
        tracing::info!(addr = %self.local_addr()?, "port listener starting");
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("port listener shutting down");
                    return Ok(());
                }

                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(a) => a,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    tracing::trace!(%peer_addr, "accepted");
                    let participator = Arc::clone(&self.participator);
                    tokio::spawn(async move {
                        // Failures are logged by the participator.
                        let _ = participator.handle_new_connection(stream).await;
                    });
                }
            }
        }
    }
}
