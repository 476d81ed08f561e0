//! House network: wires the device's queues, registry and tasks together.
//!
//! `open` starts:
//!   - the port listener on the role's port
//!   - the outbox drain
//!   - the beacon emitter (hub) or beacon listener (extension)
//!   - the keep-alive tick that reopens discovery after a long silence
//!
//! `close` stops all of them and every worker.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use house_core::config::{HouseConfig, OutboxConfig};
use house_core::identity::HUB_IDENTIFIER;
use house_core::{Category, HouseIdentifier, Message, Role};
use house_services::{DeviceInbox, MessageOutbox, PackageRegistry};

use crate::beacon;
use crate::device::{ContactClock, DeviceConnectors};
use crate::listener::PortListener;
use crate::participator::Participator;
use crate::session::{HandshakeResponse, Handshaker};

/// Everything that makes up this device, shared by every network task.
pub struct HouseDevice {
    pub identifier: HouseIdentifier,
    pub role: Role,
    pub categories: BTreeSet<Category>,
    pub outbox: Arc<MessageOutbox>,
    pub packages: Arc<PackageRegistry>,
}

impl HouseDevice {
    /// The hub always answers to the reserved hub identifier.
    pub fn hub(outbox: &OutboxConfig) -> Self {
        Self::new(HUB_IDENTIFIER, Role::Hub, BTreeSet::new(), outbox)
    }

    pub fn extension(
        identifier: HouseIdentifier,
        categories: BTreeSet<Category>,
        outbox: &OutboxConfig,
    ) -> Self {
        Self::new(identifier, Role::Extension, categories, outbox)
    }

    fn new(
        identifier: HouseIdentifier,
        role: Role,
        categories: BTreeSet<Category>,
        outbox: &OutboxConfig,
    ) -> Self {
        Self {
            identifier,
            role,
            categories,
            outbox: Arc::new(MessageOutbox::new(outbox.default_expiry())),
            packages: Arc::new(PackageRegistry::new()),
        }
    }

    /// Queue a message for delivery with the default expiry.
    pub fn send(&self, message: Message) {
        self.outbox.add(message);
    }
}

pub struct HouseNetwork {
    device: Arc<HouseDevice>,
    config: HouseConfig,
    participator: Arc<Participator>,
    contact: Arc<ContactClock>,
    shutdown: broadcast::Sender<()>,
    discovery: Arc<Mutex<Option<JoinHandle<()>>>>,
    local_addr: SocketAddr,
}

impl HouseNetwork {
    /// Bind the role's port and start every network task.
    pub async fn open(device: Arc<HouseDevice>, config: HouseConfig) -> Result<Self> {
        let (shutdown, _) = broadcast::channel::<()>(1);
        let contact = Arc::new(ContactClock::new());

        let handshaker = Handshaker::new(
            device.role,
            device.identifier,
            device.categories.clone(),
            config.handshake.step_timeout(),
        );
        let inbox = Arc::new(DeviceInbox::new(
            device.identifier,
            device.role,
            Arc::clone(&device.outbox),
            Arc::clone(&device.packages),
        ));
        let connectors = Arc::new(DeviceConnectors::new(
            handshaker.clone(),
            config.network.clone(),
            config.worker.clone(),
            inbox,
            Arc::clone(&contact),
        ));
        let (handshake_tx, handshake_rx) = mpsc::unbounded_channel();
        let participator = Arc::new(Participator::new(
            handshaker,
            connectors,
            Arc::clone(&device.outbox),
            Some(handshake_tx),
        ));

        let port = device.role.listening_port(&config.network);
        let listener = PortListener::bind(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            Arc::clone(&participator),
            shutdown.subscribe(),
        )
        .await?;
        let local_addr = listener.local_addr()?;

        let network = Self {
            device,
            config,
            participator,
            contact,
            shutdown,
            discovery: Arc::new(Mutex::new(None)),
            local_addr,
        };

        spawn_logged("port listener", listener.run());
        spawn_logged(
            "outbox drain",
            Arc::clone(&network.participator)
                .run_outbox(network.device.outbox.subscribe(), network.shutdown.subscribe()),
        );
        network.spawn_handshake_observer(handshake_rx);

        match network.device.role {
            Role::Hub => {
                let group = SocketAddrV4::new(
                    network.config.network.multicast_group,
                    network.config.network.multicast_port,
                );
                spawn_logged(
                    "beacon emitter",
                    beacon::emitter::emit_loop(
                        group,
                        network.config.network.beacon_interval(),
                        network.shutdown.subscribe(),
                    ),
                );
            }
            Role::Extension => {
                network.start_discovery();
                network.spawn_keepalive();
            }
        }

        tracing::info!(
            identifier = network.device.identifier,
            role = %network.device.role,
            addr = %local_addr,
            "house network open"
        );
        Ok(network)
    }

    pub fn device(&self) -> &Arc<HouseDevice> {
        &self.device
    }

    pub fn connectors(&self) -> &Arc<DeviceConnectors> {
        self.participator.connectors()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn last_contact(&self) -> Instant {
        self.contact.last_contact()
    }

    pub fn is_discovering(&self) -> bool {
        is_discovering(&self.discovery)
    }

    /// Dial a peer directly instead of waiting for discovery.
    pub async fn connect(&self, addr: SocketAddr) -> Result<HandshakeResponse> {
        self.participator.connect(addr).await
    }

    /// Stop every task and worker. Known peers are remembered.
    pub async fn close(&self) {
        let _ = self.shutdown.send(());
        stop_discovery(&self.discovery);
        self.connectors().stop_all().await;
        tracing::info!("house network closed");
    }

    fn start_discovery(&self) {
        start_discovery(&self.discovery, &self.config, &self.participator);
    }

    /// An extension that reached its hub no longer needs to listen for it.
    fn spawn_handshake_observer(&self, mut handshakes: mpsc::UnboundedReceiver<HandshakeResponse>) {
        let discovery = Arc::clone(&self.discovery);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => return,
                    response = handshakes.recv() => match response {
                        Some(response) if response.peer_role == Role::Hub => {
                            stop_discovery(&discovery);
                        }
                        Some(_) => {}
                        None => return,
                    },
                }
            }
        });
    }

    /// Reopen discovery once every peer has been silent for too long.
    fn spawn_keepalive(&self) {
        let discovery = Arc::clone(&self.discovery);
        let config = self.config.clone();
        let participator = Arc::clone(&self.participator);
        let contact = Arc::clone(&self.contact);
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker =
            tokio::time::interval(config.network.keepalive().max(Duration::from_secs(1)));

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => return,
                    _ = ticker.tick() => {
                        let silent = contact.since_last_contact();
                        let quiet = silent >= config.network.rediscover_after();
                        if quiet && !is_discovering(&discovery) {
                            tracing::info!(
                                silent_secs = silent.as_secs(),
                                "no contact, reopening discovery"
                            );
                            start_discovery(&discovery, &config, &participator);
                        }
                    }
                }
            }
        });
    }
}

fn is_discovering(discovery: &Mutex<Option<JoinHandle<()>>>) -> bool {
    discovery.lock().as_ref().is_some_and(|h| !h.is_finished())
}

fn start_discovery(
    discovery: &Mutex<Option<JoinHandle<()>>>,
    config: &HouseConfig,
    participator: &Arc<Participator>,
) {
    let mut slot = discovery.lock();
    if slot.as_ref().is_some_and(|h| !h.is_finished()) {
        return;
    }
    *slot = Some(spawn_logged(
        "beacon listener",
        beacon::listener::listen_loop(config.network.clone(), Arc::clone(participator)),
    ));
}

fn stop_discovery(discovery: &Mutex<Option<JoinHandle<()>>>) {
    if let Some(handle) = discovery.lock().take() {
        handle.abort();
        tracing::debug!("discovery stopped");
    }
}

fn spawn_logged<F>(name: &'static str, task: F) -> JoinHandle<()>
where
    F: std::future::Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = task.await {
            tracing::error!(task = name, error = %e, "task failed");
        }
    })
}
