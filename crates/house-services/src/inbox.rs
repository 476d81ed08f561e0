//! Inbound routing: where a message decoded off a peer socket goes next.

use std::sync::Arc;

use house_core::identity::HUB_IDENTIFIER;
use house_core::{HouseIdentifier, Message, Role};

use crate::outbox::MessageOutbox;
use crate::packages::PackageRegistry;

/// Receives every message a worker decodes, in socket order.
pub trait MessageInbox: Send + Sync {
    fn received(&self, message: Message);
}

/// What the inbox did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Addressed to this device; handed to the package registry.
    Delivered,
    /// Hub only: addressed to another extension; queued for forwarding.
    Relayed,
    /// Extension only: not addressed to this device.
    Dropped,
}

/// The inbox of one House device.
///
/// The hub sits in the middle of the star, so anything it receives for
/// another device is relayed through its outbox. Extensions only accept
/// their own mail.
pub struct DeviceInbox {
    identifier: HouseIdentifier,
    role: Role,
    outbox: Arc<MessageOutbox>,
    packages: Arc<PackageRegistry>,
}

impl DeviceInbox {
    pub fn new(
        identifier: HouseIdentifier,
        role: Role,
        outbox: Arc<MessageOutbox>,
        packages: Arc<PackageRegistry>,
    ) -> Self {
        Self { identifier, role, outbox, packages }
    }

    pub fn route(&self, message: Message) -> Route {
        let recipient = message.recipient();
        match self.role {
            Role::Hub if recipient != HUB_IDENTIFIER && recipient != self.identifier => {
                tracing::debug!(recipient, "relaying message");
                self.outbox.add(message);
                Route::Relayed
            }
            Role::Extension if recipient != self.identifier => {
                tracing::warn!(
                    recipient,
                    own = self.identifier,
                    "dropping message addressed to another device"
                );
                Route::Dropped
            }
            _ => {
                self.packages.handle(message.bundle());
                Route::Delivered
            }
        }
    }
}

impl MessageInbox for DeviceInbox {
    fn received(&self, message: Message) {
        self.route(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use house_core::{Priority, ServiceBundle};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn message(recipient: HouseIdentifier) -> Message {
        Message::new(recipient, Priority::Normal, ServiceBundle::new(8, 1, vec![1]).unwrap())
    }

    fn inbox(
        identifier: HouseIdentifier,
        role: Role,
    ) -> (DeviceInbox, Arc<MessageOutbox>, Arc<AtomicUsize>) {
        let outbox = Arc::new(MessageOutbox::new(Duration::from_secs(60)));
        let packages = Arc::new(PackageRegistry::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        packages.register(8, 1, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (
            DeviceInbox::new(identifier, role, Arc::clone(&outbox), packages),
            outbox,
            hits,
        )
    }

    #[test]
    fn hub_delivers_its_own_mail() {
        let (inbox, outbox, hits) = inbox(HUB_IDENTIFIER, Role::Hub);
        assert_eq!(inbox.route(message(HUB_IDENTIFIER)), Route::Delivered);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(outbox.upper_bound_count(), 0);
    }

    #[test]
    fn hub_relays_mail_for_extensions() {
        let (inbox, outbox, hits) = inbox(HUB_IDENTIFIER, Role::Hub);
        assert_eq!(inbox.route(message(4242)), Route::Relayed);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(outbox.pop(4242).unwrap().message(), &message(4242));
    }

    #[test]
    fn extension_delivers_own_and_drops_foreign_mail() {
        let (inbox, outbox, hits) = inbox(77, Role::Extension);
        assert_eq!(inbox.route(message(77)), Route::Delivered);
        assert_eq!(inbox.route(message(78)), Route::Dropped);
        assert_eq!(inbox.route(message(HUB_IDENTIFIER)), Route::Dropped);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(outbox.upper_bound_count(), 0);
    }
}
