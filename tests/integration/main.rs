//! House integration test harness.
//!
//! Every test runs a real hub and one or more extensions in this process,
//! talking over loopback TCP. Each test picks its own ports, so tests can run
//! in parallel without seeing each other's peers.

use std::collections::BTreeSet;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::mpsc;

use house_core::config::HouseConfig;
use house_core::{Category, HouseIdentifier, Message, Priority, ServiceBundle};
use housed::{HouseDevice, HouseNetwork};

mod delivery;
mod discovery;
mod handshake;

// ── Harness ───────────────────────────────────────────────────────────────────

/// A port nothing is listening on right now.
pub fn free_port() -> u16 {
    TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .expect("no free port")
}

/// Config for one device in a test. Every device in a test shares the hub
/// port. Extensions each listen on their own port; the hub dials
/// `extension_port` when it reconnects.
pub fn config(hub_port: u16, extension_port: u16) -> HouseConfig {
    let mut config = HouseConfig::default();
    config.network.hub_port = hub_port;
    config.network.extension_port = extension_port;
    config.network.multicast_port = free_port();
    config.handshake.step_timeout_ms = 2000;
    config
}

pub fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

pub async fn open_hub(hub_port: u16, extension_port: u16) -> Result<HouseNetwork> {
    let config = config(hub_port, extension_port);
    let device = HouseDevice::hub(&config.outbox);
    HouseNetwork::open(Arc::new(device), config).await
}

pub async fn open_extension(
    hub_port: u16,
    extension_port: u16,
    identifier: HouseIdentifier,
    categories: &[Category],
) -> Result<HouseNetwork> {
    let config = config(hub_port, extension_port);
    let device = HouseDevice::extension(
        identifier,
        categories.iter().copied().collect::<BTreeSet<_>>(),
        &config.outbox,
    );
    HouseNetwork::open(Arc::new(device), config).await
}

/// Register a service on `network` that forwards every payload to a channel.
pub fn capture(
    network: &HouseNetwork,
    package: u16,
    service: u16,
) -> mpsc::UnboundedReceiver<Vec<u8>> {
    let (tx, rx) = mpsc::unbounded_channel();
    network.device().packages.register(package, service, move |data| {
        let _ = tx.send(data.to_vec());
    });
    rx
}

pub fn message(recipient: HouseIdentifier, package: u16, service: u16, data: &[u8]) -> Message {
    Message::new(
        recipient,
        Priority::Normal,
        ServiceBundle::new(package, service, data.to_vec()).expect("small bundle"),
    )
}

/// Wait up to five seconds for the next captured payload.
pub async fn next(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Result<Vec<u8>> {
    match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        Ok(Some(data)) => Ok(data),
        Ok(None) => bail!("service channel closed"),
        Err(_) => bail!("timed out waiting for delivery"),
    }
}

/// Poll `check` until it holds, for up to five seconds.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
