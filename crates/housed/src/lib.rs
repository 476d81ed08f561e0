//! housed: the House network daemon: handshakes, peer workers, discovery,
//! and the orchestration that ties them to a device's outbox and packages.

pub mod beacon;
pub mod device;
pub mod listener;
pub mod network;
pub mod participator;
pub mod session;

pub use network::{HouseDevice, HouseNetwork};
pub use participator::Participator;
