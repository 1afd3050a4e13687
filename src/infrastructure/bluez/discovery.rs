//! Discovery Engine
//!
//! Finds the adapter to use, both from the initial `GetManagedObjects`
//! enumeration and from live `InterfacesAdded` / `InterfacesRemoved`
//! signals. Every service-up cycle gets a new generation number; signals and
//! enumeration replies from an older cycle are dropped.

use crate::domain::error::HalError;
use crate::domain::registry::{AdapterRegistry, Rejected};
use crate::infrastructure::bluez::protocol::{
    decode_object, Decoded, InterfaceMap, ManagedObjects, ADAPTER_INTERFACE,
};
use crate::infrastructure::bluez::transport::{
    BusTransport, EngineMessage, EngineSender, SignalSink, SignalWatch,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Generation reserved for the service presence watch.
pub(crate) const PRESENCE_GENERATION: u64 = 0;

#[derive(Debug, Default)]
pub(crate) struct Discovery {
    registry: AdapterRegistry,
    subscription: Option<SignalWatch>,
    enumeration: Option<JoinHandle<()>>,
    generation: u64,
}

impl Discovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to object manager signals, then enumerate. The enumeration
    /// is only issued once the subscription is in place, so no adapter can
    /// slip between the two.
    pub async fn start<B: BusTransport>(
        &mut self,
        bus: &Arc<B>,
        tx: &EngineSender,
    ) -> Result<(), HalError> {
        self.reset();
        let generation = self.generation;

        let watch = bus
            .subscribe_object_manager(SignalSink::new(tx.clone(), generation))
            .await?;
        self.subscription = Some(watch);

        debug!(generation, "Requesting managed objects");
        let bus = bus.clone();
        let tx = tx.clone();
        self.enumeration = Some(tokio::spawn(async move {
            let result = bus.get_managed_objects().await;
            let _ = tx.send(EngineMessage::ManagedObjects { generation, result });
        }));

        Ok(())
    }

    /// Drop the subscription and the active adapter, and invalidate anything
    /// still in flight for the current cycle.
    pub fn reset(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            debug!(generation = self.generation, "Releasing object manager subscription");
            subscription.release();
        }
        if let Some(enumeration) = self.enumeration.take() {
            enumeration.abort();
        }
        self.registry.clear();
        self.generation += 1;
    }

    fn is_current(&self, generation: u64) -> bool {
        generation == self.generation && self.subscription.is_some()
    }

    /// Returns the path to power on when this registered a new, unpowered
    /// adapter.
    pub fn on_interfaces_added(
        &mut self,
        generation: u64,
        path: &str,
        interfaces: &InterfaceMap,
    ) -> Option<String> {
        if !self.is_current(generation) {
            debug!(path, generation, "Dropping InterfacesAdded from a stale subscription");
            return None;
        }
        self.consider(path, interfaces)
    }

    pub fn on_interfaces_removed(&mut self, generation: u64, path: &str, interfaces: &[String]) {
        if !self.is_current(generation) {
            debug!(path, generation, "Dropping InterfacesRemoved from a stale subscription");
            return;
        }
        if !self.registry.is_active(path) {
            return;
        }
        if interfaces.iter().any(|name| name == ADAPTER_INTERFACE) {
            info!(path, "Active adapter removed");
            self.registry.clear();
        }
    }

    /// Handle the `GetManagedObjects` reply. Returns the paths to power on.
    pub fn on_managed_objects(
        &mut self,
        generation: u64,
        result: Result<ManagedObjects, HalError>,
    ) -> Vec<String> {
        if !self.is_current(generation) {
            debug!(generation, "Dropping managed objects reply from an earlier cycle");
            return Vec::new();
        }

        let objects = match result {
            Ok(objects) => objects,
            Err(e) => {
                warn!("Failed to get managed objects: {}", e);
                return Vec::new();
            }
        };

        debug!(count = objects.len(), "Processing managed objects");
        let to_power: Vec<String> = objects
            .iter()
            .filter_map(|(path, interfaces)| self.consider(path, interfaces))
            .collect();

        if self.registry.active().is_none() {
            info!("No Bluetooth adapter found after initial scan");
        }
        to_power
    }

    fn consider(&mut self, path: &str, interfaces: &InterfaceMap) -> Option<String> {
        let record = match decode_object(path, interfaces) {
            Decoded::Adapter(record) => record,
            Decoded::NotAnAdapter => return None,
            Decoded::Incomplete => {
                info!(path, "Adapter did not have an address, not using");
                return None;
            }
        };

        match self.registry.try_register(record) {
            Ok(active) if !active.powered => {
                info!(path = %active.object_path, "Adapter is not powered, powering on");
                Some(active.object_path.clone())
            }
            Ok(_) => None,
            Err(Rejected::Occupied { .. } | Rejected::MissingAddress) => None,
        }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    #[cfg(test)]
    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    #[cfg(test)]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
