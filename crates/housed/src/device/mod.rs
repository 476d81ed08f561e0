//! Peer devices: where they are, and the workers bound to their sockets.

pub mod connector;
pub mod connectors;
pub mod worker;

pub use connector::DeviceConnector;
pub use connectors::DeviceConnectors;
pub use worker::{ContactClock, DeviceWorker};
