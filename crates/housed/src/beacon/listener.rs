//! Beacon listener: the extension's side of discovery.
//!
//! Runs until aborted. The network stops it once the hub is reached and
//! starts it again when the hub has been silent for too long.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use house_core::config::NetworkConfig;

use super::is_beacon;
use crate::participator::Participator;

pub async fn listen_loop(network: NetworkConfig, participator: Arc<Participator>) -> Result<()> {
    let socket = make_listener_socket(network.multicast_group, network.multicast_port)
        .context("failed to create beacon listener socket")?;
    let socket = UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;

    let mut buf = vec![0u8; 64];
    tracing::info!(
        group = %network.multicast_group,
        port = network.multicast_port,
        "beacon listener starting"
    );

    loop {
        let (len, sender) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "recv_from failed");
                continue;
            }
        };

        if !is_beacon(&buf[..len]) {
            tracing::trace!(%sender, "ignoring foreign datagram");
            continue;
        }

        let hub = SocketAddr::new(sender.ip(), network.hub_port);
        tracing::debug!(%hub, "hub beacon heard");
        if let Err(e) = participator.connect(hub).await {
            tracing::warn!(%hub, error = %e, "could not join hub");
        }
    }
}

fn make_listener_socket(group: Ipv4Addr, port: u16) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket.bind(&bind_addr.into()).context("bind()")?;

    socket
        .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
        .context("IP_ADD_MEMBERSHIP")?;

    Ok(socket.into())
}
