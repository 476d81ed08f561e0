use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};

use house_core::HouseIdentifier;

/// Last known reachability of a peer.
///
/// Identity is the identifier alone; the address is metadata that may be
/// refreshed.
#[derive(Debug, Clone)]
pub struct DeviceConnector {
    identifier: HouseIdentifier,
    ip_address: IpAddr,
}

impl DeviceConnector {
    pub fn new(identifier: HouseIdentifier, ip_address: IpAddr) -> Self {
        Self { identifier, ip_address }
    }

    pub fn identifier(&self) -> HouseIdentifier {
        self.identifier
    }

    pub fn ip_address(&self) -> IpAddr {
        self.ip_address
    }

    pub fn socket_addr(&self, port: u16) -> SocketAddr {
        SocketAddr::new(self.ip_address, port)
    }
}

impl PartialEq for DeviceConnector {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
    }
}

impl Eq for DeviceConnector {}

impl Hash for DeviceConnector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identifier.hash(state);
    }
}
