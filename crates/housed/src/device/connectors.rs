//! Device connectors: the registry of known peers and their live workers.
//!
//! One lock guards both maps. `forward` holds it across lookup, reconnect
//! and write, so two forwards can never race to open duplicate connections
//! to the same peer.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use house_core::config::{NetworkConfig, WorkerConfig};
use house_core::identity::HUB_IDENTIFIER;
use house_core::{HouseIdentifier, Message, Role};
use house_services::MessageInbox;

use super::connector::DeviceConnector;
use super::worker::{ContactClock, DeviceWorker};
use crate::session::Handshaker;

#[derive(Default)]
struct ConnectorTable {
    known: HashMap<HouseIdentifier, DeviceConnector>,
    workers: HashMap<HouseIdentifier, Arc<DeviceWorker>>,
}

pub struct DeviceConnectors {
    handshaker: Handshaker,
    network: NetworkConfig,
    worker_settings: WorkerConfig,
    inbox: Arc<dyn MessageInbox>,
    contact: Arc<ContactClock>,
    table: Mutex<ConnectorTable>,
}

impl DeviceConnectors {
    pub fn new(
        handshaker: Handshaker,
        network: NetworkConfig,
        worker_settings: WorkerConfig,
        inbox: Arc<dyn MessageInbox>,
        contact: Arc<ContactClock>,
    ) -> Self {
        Self {
            handshaker,
            network,
            worker_settings,
            inbox,
            contact,
            table: Mutex::new(ConnectorTable::default()),
        }
    }

    /// Record where `identifier` lives and, given a socket, bind a worker to it.
    ///
    /// A new address replaces the old one and retires its worker. When the
    /// address is unchanged and a worker is still running, the supplied
    /// socket is redundant and is closed.
    pub async fn update_connector(
        &self,
        address: IpAddr,
        stream: Option<TcpStream>,
        identifier: HouseIdentifier,
    ) {
        let mut table = self.table.lock().await;

        let moved = table
            .known
            .get(&identifier)
            .map_or(true, |known| known.ip_address() != address);

        if moved {
            tracing::debug!(peer = identifier, %address, "connector updated");
            table
                .known
                .insert(identifier, DeviceConnector::new(identifier, address));
            if let Some(old) = table.workers.remove(&identifier) {
                old.stop();
            }
        } else if let Some(existing) = table.workers.get(&identifier) {
            if existing.is_running() {
                if stream.is_some() {
                    tracing::debug!(
                        peer = identifier,
                        "worker already running, closing redundant socket"
                    );
                }
                return;
            }
            if let Some(stale) = table.workers.remove(&identifier) {
                stale.stop();
            }
        }

        if let Some(stream) = stream {
            let worker = self.spawn_worker(identifier, stream);
            table.workers.insert(identifier, worker);
        }
    }

    /// A running worker for `identifier`, reconnecting if the last one died.
    pub async fn worker_for(&self, identifier: HouseIdentifier) -> Option<Arc<DeviceWorker>> {
        let mut table = self.table.lock().await;
        self.worker_locked(&mut table, identifier).await
    }

    /// Write `message` towards its recipient. Returns whether the write
    /// succeeded.
    pub async fn forward(&self, message: &Message) -> bool {
        let recipient = message.recipient();
        let next_hop = self.next_hop(recipient);
        let mut table = self.table.lock().await;
        match self.worker_locked(&mut table, next_hop).await {
            Some(worker) => worker.write(message).await,
            None => {
                tracing::debug!(peer = recipient, via = next_hop, "no route to peer");
                false
            }
        }
    }

    /// The peer whose worker carries mail for `recipient`. Extensions only
    /// ever connect to the hub, which relays whatever is not its own.
    pub fn next_hop(&self, recipient: HouseIdentifier) -> HouseIdentifier {
        match self.handshaker.role() {
            Role::Extension if recipient != self.handshaker.identifier() => HUB_IDENTIFIER,
            _ => recipient,
        }
    }

    /// Whether a connector is known for `identifier`.
    pub async fn contains(&self, identifier: HouseIdentifier) -> bool {
        self.table.lock().await.known.contains_key(&identifier)
    }

    pub async fn connector(&self, identifier: HouseIdentifier) -> Option<DeviceConnector> {
        self.table.lock().await.known.get(&identifier).cloned()
    }

    /// Whether a running worker is bound to `identifier`.
    pub async fn is_connected(&self, identifier: HouseIdentifier) -> bool {
        self.table
            .lock()
            .await
            .workers
            .get(&identifier)
            .is_some_and(|w| w.is_running())
    }

    /// Stop every worker. Connectors are kept, so peers can be reached again.
    pub async fn stop_all(&self) {
        let mut table = self.table.lock().await;
        for (_, worker) in table.workers.drain() {
            worker.stop();
        }
        tracing::debug!(known = table.known.len(), "all workers stopped");
    }

    async fn worker_locked(
        &self,
        table: &mut ConnectorTable,
        identifier: HouseIdentifier,
    ) -> Option<Arc<DeviceWorker>> {
        if let Some(worker) = table.workers.get(&identifier) {
            if worker.is_running() {
                return Some(Arc::clone(worker));
            }
        }
        if let Some(stale) = table.workers.remove(&identifier) {
            stale.stop();
        }

        let connector = table.known.get(&identifier)?.clone();
        let stream = match self.reconnect(&connector).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(peer = identifier, error = %e, "reconnect failed");
                return None;
            }
        };
        let worker = self.spawn_worker(identifier, stream);
        table.workers.insert(identifier, Arc::clone(&worker));
        Some(worker)
    }

    /// Dial the peer's role port and handshake on the new socket.
    async fn reconnect(&self, connector: &DeviceConnector) -> Result<TcpStream> {
        let addr = connector.socket_addr(self.handshaker.role().peer_port(&self.network));
        tracing::debug!(peer = connector.identifier(), %addr, "reconnecting");

        let mut stream = timeout(self.handshaker.step_timeout(), TcpStream::connect(addr))
            .await
            .context("connect timed out")?
            .with_context(|| format!("connect to {addr} failed"))?;

        let response = self
            .handshaker
            .perform(&mut stream)
            .await
            .context("handshake failed")?;
        if response.peer_identifier != connector.identifier() {
            bail!(
                "peer at {addr} identified as {}, expected {}",
                response.peer_identifier,
                connector.identifier()
            );
        }
        Ok(stream)
    }

    fn spawn_worker(&self, identifier: HouseIdentifier, stream: TcpStream) -> Arc<DeviceWorker> {
        let worker = DeviceWorker::new(
            identifier,
            stream,
            Arc::clone(&self.inbox),
            Arc::clone(&self.contact),
            self.worker_settings.clone(),
        );
        worker.start();
        worker
    }
}
