//! house-core: shared types, HNCP constants, and the message wire codec.
//! All other House crates depend on this one.

pub mod category;
pub mod config;
pub mod identity;
pub mod wire;

pub use category::Category;
pub use identity::{HouseIdentifier, Role};
pub use wire::{CodecError, Message, Priority, ServiceBundle};
