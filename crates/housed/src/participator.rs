//! Participator: admits new connections into the network and drains the
//! outbox onto them.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

use house_core::HouseIdentifier;
use house_services::MessageOutbox;

use crate::device::DeviceConnectors;
use crate::session::{HandshakeError, HandshakeResponse, Handshaker};

pub struct Participator {
    handshaker: Handshaker,
    connectors: Arc<DeviceConnectors>,
    outbox: Arc<MessageOutbox>,
    observer: Option<mpsc::UnboundedSender<HandshakeResponse>>,
}

impl Participator {
    pub fn new(
        handshaker: Handshaker,
        connectors: Arc<DeviceConnectors>,
        outbox: Arc<MessageOutbox>,
        observer: Option<mpsc::UnboundedSender<HandshakeResponse>>,
    ) -> Self {
        Self {
            handshaker,
            connectors,
            outbox,
            observer,
        }
    }

    pub fn connectors(&self) -> &Arc<DeviceConnectors> {
        &self.connectors
    }

    /// Handshake on a fresh connection, then hand the socket to the peer's
    /// worker. A failed handshake closes the socket.
    pub async fn handle_new_connection(
        &self,
        mut stream: TcpStream,
    ) -> Result<HandshakeResponse, HandshakeError> {
        let peer_addr = stream.peer_addr()?;
        tracing::debug!(%peer_addr, role = %self.handshaker.role(), "new connection");

        match self.handshaker.perform(&mut stream).await {
            Ok(response) => {
                tracing::info!(
                    %peer_addr,
                    peer = response.peer_identifier,
                    role = %response.peer_role,
                    "peer joined"
                );
                self.connectors
                    .update_connector(peer_addr.ip(), Some(stream), response.peer_identifier)
                    .await;
                if let Some(observer) = &self.observer {
                    let _ = observer.send(response.clone());
                }
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(%peer_addr, error = %e, "handshake failed");
                let _ = stream.shutdown().await;
                Err(e)
            }
        }
    }

    /// Dial `addr` and admit the resulting connection.
    pub async fn connect(&self, addr: SocketAddr) -> Result<HandshakeResponse> {
        let stream = timeout(self.handshaker.step_timeout(), TcpStream::connect(addr))
            .await
            .context("connect timed out")?
            .with_context(|| format!("connect to {addr} failed"))?;
        Ok(self.handle_new_connection(stream).await?)
    }

    /// Send everything queued for `recipient`. On the first failed write the
    /// message goes back into the outbox and draining stops until the next
    /// notification.
    pub async fn drain(&self, recipient: HouseIdentifier) {
        while let Some(pending) = self.outbox.pop(recipient) {
            if !self.connectors.forward(pending.message()).await {
                tracing::warn!(peer = recipient, "delivery failed, message backlogged");
                self.outbox.backlog(pending);
                return;
            }
        }
    }

    /// Consume outbox notifications until shutdown.
    pub async fn run_outbox(
        self: Arc<Self>,
        mut notifications: mpsc::UnboundedReceiver<HouseIdentifier>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("outbox drain shutting down");
                    return Ok(());
                }

                recipient = notifications.recv() => {
                    let Some(recipient) = recipient else {
                        tracing::info!("outbox dropped, drain exiting");
                        return Ok(());
                    };
                    self.drain(recipient).await;
                }
            }
        }
    }
}
