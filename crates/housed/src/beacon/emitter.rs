//! Beacon emitter: the hub's side of discovery.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time;

use house_core::wire::BEACON_MESSAGE;

/// Announce the hub to `group` every `interval` until shutdown.
pub async fn emit_loop(
    group: SocketAddrV4,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let socket = make_emitter_socket().context("failed to create beacon socket")?;
    let socket = UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;

    let mut ticker = time::interval(interval.max(Duration::from_millis(100)));
    tracing::info!(%group, interval_secs = interval.as_secs(), "beacon emitter starting");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("beacon emitter shutting down");
                return Ok(());
            }

            _ = ticker.tick() => {
                match socket.send_to(BEACON_MESSAGE, group).await {
                    Ok(n) => tracing::trace!(bytes = n, "beacon sent"),
                    Err(e) => tracing::warn!(error = %e, "beacon send failed"),
                }
            }
        }
    }
}

fn make_emitter_socket() -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    // Local network only.
    socket.set_multicast_ttl_v4(1).context("IP_MULTICAST_TTL")?;
    socket.set_multicast_loop_v4(true).context("IP_MULTICAST_LOOP")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
    socket.bind(&bind_addr.into()).context("bind()")?;

    Ok(socket.into())
}
