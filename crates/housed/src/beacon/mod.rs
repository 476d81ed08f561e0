//! Hub discovery over IPv4 multicast.
//!
//! The hub periodically announces itself to the multicast group. An
//! extension that hears the announcement dials the sender on the hub port.

pub mod emitter;
pub mod listener;

use house_core::wire::BEACON_MESSAGE;

/// Whether a datagram is a hub announcement.
pub fn is_beacon(datagram: &[u8]) -> bool {
    datagram == BEACON_MESSAGE
}
