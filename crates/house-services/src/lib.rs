//! house-services: the stateful building blocks shared by every House
//! device: the per-recipient outbox, the package/service dispatch registry,
//! inbound routing, and identity persistence.

pub mod identity;
pub mod inbox;
pub mod outbox;
pub mod packages;

pub use identity::{resolve_identifier, CacheError, FileCache, KeyValueStore, MemoryCache};
pub use inbox::{DeviceInbox, MessageInbox, Route};
pub use outbox::{MessageOutbox, PendingMessage};
pub use packages::PackageRegistry;
