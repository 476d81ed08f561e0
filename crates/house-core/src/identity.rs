//! Device identity: who a House device is and which side of the star it sits on.

use serde::{Deserialize, Serialize};

use crate::config::NetworkConfig;

/// Names a House device for the lifetime of its identity.
///
/// Every extension must hold a unique identifier outside the reserved range.
/// Two extensions sharing an identifier is undefined behaviour; nothing here
/// validates it.
pub type HouseIdentifier = u64;

/// Reserved: the hub.
pub const HUB_IDENTIFIER: HouseIdentifier = 1;

/// Reserved: null / error.
pub const NULL_IDENTIFIER: HouseIdentifier = 0;

/// True for the identifiers no extension may hold.
pub fn is_reserved(identifier: HouseIdentifier) -> bool {
    identifier == HUB_IDENTIFIER || identifier == NULL_IDENTIFIER
}

/// Mint a random identifier outside the reserved range.
pub fn random_identifier() -> HouseIdentifier {
    use rand::Rng;
    rand::thread_rng().gen_range(HUB_IDENTIFIER + 1..=u64::MAX)
}

/// The role a device plays in the House network.
///
/// Selected once at startup. The hub initiates handshakes and emits discovery
/// beacons; extensions answer handshakes and listen for beacons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Hub,
    Extension,
}

impl Role {
    /// The role on the other end of every connection this device makes.
    pub fn peer(self) -> Role {
        match self {
            Role::Hub => Role::Extension,
            Role::Extension => Role::Hub,
        }
    }

    /// TCP port this device accepts connections on.
    pub fn listening_port(self, network: &NetworkConfig) -> u16 {
        match self {
            Role::Hub => network.hub_port,
            Role::Extension => network.extension_port,
        }
    }

    /// TCP port to dial when connecting out to a peer.
    pub fn peer_port(self, network: &NetworkConfig) -> u16 {
        self.peer().listening_port(network)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Hub => f.write_str("hub"),
            Role::Extension => f.write_str("extension"),
        }
    }
}
