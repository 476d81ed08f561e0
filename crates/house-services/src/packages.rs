//! Package registry: routes service bundles to the handler registered for
//! their `(package, service)` pair.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use house_core::wire::{PackageIdentifier, ServiceIdentifier};
use house_core::ServiceBundle;

/// Called with the bundle's data bytes.
pub type ServiceHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Registered services, grouped by package.
#[derive(Default)]
pub struct PackageRegistry {
    packages: DashMap<PackageIdentifier, HashMap<ServiceIdentifier, ServiceHandler>>,
}

impl PackageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. A later registration for the same pair replaces
    /// the earlier one.
    pub fn register<F>(&self, package: PackageIdentifier, service: ServiceIdentifier, handler: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.packages
            .entry(package)
            .or_default()
            .insert(service, Arc::new(handler));
        tracing::debug!(package, service, "service registered");
    }

    /// Remove one service. Returns whether it was registered.
    pub fn deregister(&self, package: PackageIdentifier, service: ServiceIdentifier) -> bool {
        let removed = match self.packages.get_mut(&package) {
            Some(mut services) => services.remove(&service).is_some(),
            None => false,
        };
        self.packages.remove_if(&package, |_, services| services.is_empty());
        removed
    }

    /// Remove every service of a package. Returns whether it was registered.
    pub fn deregister_package(&self, package: PackageIdentifier) -> bool {
        self.packages.remove(&package).is_some()
    }

    pub fn contains(&self, package: PackageIdentifier, service: ServiceIdentifier) -> bool {
        self.packages
            .get(&package)
            .is_some_and(|services| services.contains_key(&service))
    }

    /// Hand a bundle to its service. An unknown package or service is logged
    /// and ignored. Returns whether a handler ran.
    pub fn handle(&self, bundle: &ServiceBundle) -> bool {
        let (package, service) = (bundle.package(), bundle.service());

        // Clone the handler out so the map is unlocked while it runs; handlers
        // may register or deregister services themselves.
        let handler = {
            let Some(services) = self.packages.get(&package) else {
                tracing::warn!(package, "no package registered for bundle");
                return false;
            };
            match services.get(&service) {
                Some(handler) => Arc::clone(handler),
                None => {
                    tracing::warn!(package, service, "package has no such service");
                    return false;
                }
            }
        };

        tracing::trace!(package, service, data = %hex::encode(bundle.data()), "dispatching bundle");
        handler(bundle.data());
        true
    }
}
