//! Service Presence Watcher
//!
//! Tracks whether the Bluetooth management service owns its bus name and
//! restarts discovery every time it (re)appears.

use crate::domain::models::{HalEvent, ServiceState};
use crate::infrastructure::bluez::discovery::Discovery;
use crate::infrastructure::bluez::notifier::EventNotifier;
use crate::infrastructure::bluez::transport::{BusTransport, EngineSender};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Default)]
pub(crate) struct PresenceWatcher {
    state: ServiceState,
}

impl PresenceWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// The service gained an owner. Also runs for a repeated appearance
    /// without a vanish in between.
    pub async fn on_appeared<B: BusTransport>(
        &mut self,
        owner: &str,
        discovery: &mut Discovery,
        bus: &Arc<B>,
        tx: &EngineSender,
        notifier: &EventNotifier,
    ) {
        info!(owner, previous = ?self.state, "Bluetooth service appeared");

        if let Err(e) = discovery.start(bus, tx).await {
            error!("Failed to subscribe to adapter signals: {}", e);
        }

        self.state = ServiceState::Up;
        notifier.notify(HalEvent::ServiceUp);
    }

    pub fn on_vanished(&mut self, discovery: &mut Discovery, notifier: &EventNotifier) {
        info!(previous = ?self.state, "Bluetooth service vanished");

        discovery.reset();
        self.state = ServiceState::Down;
        notifier.notify(HalEvent::ServiceDown);
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }
}
