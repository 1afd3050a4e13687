//! HAL Engine
//!
//! The single task that owns all HAL state. Bus notifications, enumeration
//! replies, caller requests and operation replies all arrive as
//! [`EngineMessage`]s and are handled one at a time, so nothing here needs a
//! lock.

use crate::domain::error::HalError;
use crate::infrastructure::bluez::discovery::{Discovery, PRESENCE_GENERATION};
use crate::infrastructure::bluez::dispatcher::{self, Dispatcher};
use crate::infrastructure::bluez::notifier::EventNotifier;
use crate::infrastructure::bluez::transport::{
    BusSignal, BusTransport, EngineMessage, EngineReceiver, EngineSender, SignalSink, SignalWatch,
};
use crate::infrastructure::bluez::watcher::PresenceWatcher;
use std::sync::Arc;
use tracing::{debug, info};

pub(crate) struct Engine<B: BusTransport> {
    bus: Arc<B>,
    tx: EngineSender,
    notifier: EventNotifier,
    watcher: PresenceWatcher,
    discovery: Discovery,
    dispatcher: Dispatcher<B>,
    presence: Option<SignalWatch>,
}

impl<B: BusTransport> Engine<B> {
    /// Attach the presence watch. The watch reports the service's current
    /// state as its first message, so discovery starts from [`Engine::run`].
    pub async fn start(
        bus: Arc<B>,
        tx: EngineSender,
        notifier: EventNotifier,
    ) -> Result<Self, HalError> {
        let presence = bus
            .watch_service(SignalSink::new(tx.clone(), PRESENCE_GENERATION))
            .await?;

        Ok(Self {
            dispatcher: Dispatcher::new(bus.clone(), tx.clone()),
            bus,
            tx,
            notifier,
            watcher: PresenceWatcher::new(),
            discovery: Discovery::new(),
            presence: Some(presence),
        })
    }

    pub async fn run(mut self, mut rx: EngineReceiver) {
        info!("HAL engine running");

        while let Some(msg) = rx.recv().await {
            if let EngineMessage::Shutdown { done } = msg {
                self.shutdown();
                let _ = done.send(());
                info!("HAL engine stopped");
                return;
            }
            self.handle(msg).await;
        }

        // Every sender is gone without an explicit shutdown.
        self.shutdown();
        debug!("HAL engine channel closed");
    }

    pub async fn handle(&mut self, msg: EngineMessage) {
        match msg {
            EngineMessage::Bus { generation, signal } => self.on_signal(generation, signal).await,
            EngineMessage::ManagedObjects { generation, result } => {
                for path in self.discovery.on_managed_objects(generation, result) {
                    self.power_on(&path);
                }
            }
            EngineMessage::SetPower { path, on, callback } => {
                self.dispatcher.set_adapter_power(&path, on, callback);
            }
            EngineMessage::OperationComplete { id, result } => {
                self.dispatcher.complete(id, result);
            }
            EngineMessage::Shutdown { done } => {
                self.shutdown();
                let _ = done.send(());
            }
        }
    }

    async fn on_signal(&mut self, generation: u64, signal: BusSignal) {
        match signal {
            BusSignal::ServiceAppeared { owner } => {
                self.watcher
                    .on_appeared(
                        &owner,
                        &mut self.discovery,
                        &self.bus,
                        &self.tx,
                        &self.notifier,
                    )
                    .await;
            }
            BusSignal::ServiceVanished => {
                self.watcher.on_vanished(&mut self.discovery, &self.notifier);
            }
            BusSignal::InterfacesAdded { path, interfaces } => {
                if let Some(path) = self
                    .discovery
                    .on_interfaces_added(generation, &path, &interfaces)
                {
                    self.power_on(&path);
                }
            }
            BusSignal::InterfacesRemoved { path, interfaces } => {
                self.discovery
                    .on_interfaces_removed(generation, &path, &interfaces);
            }
        }
    }

    fn power_on(&mut self, path: &str) {
        self.dispatcher
            .set_adapter_power(path, true, dispatcher::log_result("AutoPowerOn"));
    }

    /// Stop watching, forget the adapter and fail whatever is still pending.
    pub fn shutdown(&mut self) {
        info!(
            service = ?self.watcher.state(),
            adapter = ?self.discovery.registry().active().map(|a| a.object_path.as_str()),
            pending = self.dispatcher.in_flight(),
            "Shutting down HAL engine"
        );
        if let Some(presence) = self.presence.take() {
            presence.release();
        }
        self.discovery.reset();
        self.dispatcher.abort_all();
    }

    #[cfg(test)]
    pub fn active_adapter(&self) -> Option<&crate::domain::models::AdapterRecord> {
        self.discovery.registry().active()
    }

    #[cfg(test)]
    pub fn service_state(&self) -> crate::domain::models::ServiceState {
        self.watcher.state()
    }

    #[cfg(test)]
    pub fn in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{HalEvent, ResultCallback, ServiceState};
    use crate::infrastructure::bluez::mock::{adapter_interfaces, MockBus};
    use crate::infrastructure::bluez::protocol::{PropertyValue, ADAPTER_INTERFACE};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    struct Harness {
        bus: Arc<MockBus>,
        engine: Engine<MockBus>,
        rx: EngineReceiver,
        events: Arc<Mutex<Vec<HalEvent>>>,
    }

    impl Harness {
        async fn new(bus: MockBus) -> Self {
            let bus = Arc::new(bus);
            let (tx, rx) = mpsc::unbounded_channel();
            let events = Arc::new(Mutex::new(Vec::new()));
            let sink = events.clone();
            let notifier = EventNotifier::new(Some(Arc::new(move |event| {
                sink.lock().unwrap().push(event);
            })));
            let engine = Engine::start(bus.clone(), tx, notifier).await.unwrap();
            Self {
                bus,
                engine,
                rx,
                events,
            }
        }

        /// Feed every queued message to the engine until nothing is left,
        /// giving spawned bus tasks a chance to reply in between.
        async fn settle(&mut self) {
            loop {
                for _ in 0..8 {
                    tokio::task::yield_now().await;
                }
                match self.rx.try_recv() {
                    Ok(msg) => self.engine.handle(msg).await,
                    Err(_) => break,
                }
            }
        }

        fn power_requests(&self) -> usize {
            self.bus
                .property_sets()
                .iter()
                .filter(|set| {
                    set.interface == ADAPTER_INTERFACE
                        && set.property == "Powered"
                        && set.value == PropertyValue::Bool(true)
                })
                .count()
        }
    }

    #[tokio::test]
    async fn test_discovers_and_powers_on_adapter_from_signal() {
        let mut h = Harness::new(MockBus::new()).await;
        h.settle().await;
        assert_eq!(h.engine.service_state(), ServiceState::Down);

        h.bus.set_service_present(true);
        h.settle().await;
        assert_eq!(h.engine.service_state(), ServiceState::Up);

        h.bus.emit_interfaces_added(
            "/org/x/hci0",
            adapter_interfaces("AA:BB:CC:DD:EE:FF", false),
        );
        h.settle().await;

        let active = h.engine.active_adapter().unwrap();
        assert_eq!(active.object_path, "/org/x/hci0");
        assert_eq!(active.address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(h.power_requests(), 1);
        assert_eq!(h.bus.property_sets()[0].path, "/org/x/hci0");
        assert_eq!(h.engine.in_flight(), 0);
        assert_eq!(
            *h.events.lock().unwrap(),
            vec![HalEvent::ServiceDown, HalEvent::ServiceUp]
        );
    }

    #[tokio::test]
    async fn test_enumeration_registers_first_adapter_only() {
        let bus = MockBus::new();
        bus.add_object("/org/bluez/hci0", adapter_interfaces("AA:BB:CC:DD:EE:FF", true));
        bus.add_object("/org/bluez/hci1", adapter_interfaces("11:22:33:44:55:66", false));
        bus.set_service_present(true);
        let mut h = Harness::new(bus).await;
        h.settle().await;

        assert_eq!(
            h.engine.active_adapter().map(|a| a.object_path.as_str()),
            Some("/org/bluez/hci0")
        );
        assert_eq!(h.power_requests(), 0);

        h.bus.emit_interfaces_added(
            "/org/bluez/hci2",
            adapter_interfaces("77:88:99:AA:BB:CC", false),
        );
        h.settle().await;
        assert_eq!(
            h.engine.active_adapter().map(|a| a.object_path.as_str()),
            Some("/org/bluez/hci0")
        );
    }

    #[tokio::test]
    async fn test_added_during_enumeration_registers_once() {
        let bus = MockBus::new();
        bus.add_object("/org/bluez/hci0", adapter_interfaces("AA:BB:CC:DD:EE:FF", false));
        bus.set_service_present(true);
        let mut h = Harness::new(bus).await;
        // Presence first: subscribe, spawn enumeration.
        let Some(msg) = h.rx.recv().await else {
            panic!("expected the initial presence report");
        };
        h.engine.handle(msg).await;

        // The same adapter announced by signal before the enumeration reply.
        h.bus.emit_interfaces_added(
            "/org/bluez/hci0",
            adapter_interfaces("AA:BB:CC:DD:EE:FF", false),
        );
        h.settle().await;

        assert!(h.engine.active_adapter().is_some());
        assert_eq!(h.power_requests(), 1);
    }

    #[tokio::test]
    async fn test_signal_before_enumeration_reply_wins() {
        let bus = MockBus::new();
        bus.add_object("/org/bluez/hci1", adapter_interfaces("11:22:33:44:55:66", false));
        bus.hold_enumerations();
        bus.set_service_present(true);
        let mut h = Harness::new(bus).await;
        h.settle().await;
        assert_eq!(h.bus.enumerations(), 1);

        h.bus.emit_interfaces_added(
            "/org/bluez/hci0",
            adapter_interfaces("AA:BB:CC:DD:EE:FF", false),
        );
        h.settle().await;
        h.bus.release_enumerations();
        h.settle().await;

        let active = h.engine.active_adapter().unwrap();
        assert_eq!(active.object_path, "/org/bluez/hci0");
        assert_eq!(active.address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(h.power_requests(), 1);
        assert!(h
            .bus
            .property_sets()
            .iter()
            .all(|set| set.path == "/org/bluez/hci0"));
    }

    #[tokio::test]
    async fn test_service_down_clears_registry() {
        let bus = MockBus::new();
        bus.add_object("/org/bluez/hci0", adapter_interfaces("AA:BB:CC:DD:EE:FF", true));
        bus.set_service_present(true);
        let mut h = Harness::new(bus).await;
        h.settle().await;
        assert!(h.engine.active_adapter().is_some());

        h.bus.set_service_present(false);
        h.settle().await;

        assert!(h.engine.active_adapter().is_none());
        assert_eq!(h.engine.service_state(), ServiceState::Down);
        assert_eq!(
            *h.events.lock().unwrap(),
            vec![HalEvent::ServiceUp, HalEvent::ServiceDown]
        );
    }

    #[tokio::test]
    async fn test_signals_after_service_down_are_ignored() {
        let mut h = Harness::new(MockBus::new()).await;
        h.bus.set_service_present(true);
        h.settle().await;
        h.bus.set_service_present(false);
        h.settle().await;

        h.bus.emit_interfaces_added(
            "/org/bluez/hci0",
            adapter_interfaces("AA:BB:CC:DD:EE:FF", false),
        );
        h.settle().await;

        assert!(h.engine.active_adapter().is_none());
        assert_eq!(h.power_requests(), 0);
    }

    #[tokio::test]
    async fn test_stale_enumeration_reply_is_dropped() {
        let bus = MockBus::new();
        bus.add_object("/org/bluez/hci0", adapter_interfaces("AA:BB:CC:DD:EE:FF", false));
        bus.hold_enumerations();
        bus.set_service_present(true);
        let mut h = Harness::new(bus).await;
        h.settle().await;

        // The service restarts before the first enumeration answers.
        h.bus.set_service_present(false);
        h.settle().await;
        h.bus.clear_objects();
        h.bus.release_enumerations();
        h.bus.set_service_present(true);
        h.settle().await;

        assert!(h.engine.active_adapter().is_none());
        assert_eq!(h.power_requests(), 0);
    }

    #[tokio::test]
    async fn test_remove_then_add_same_path() {
        let mut h = Harness::new(MockBus::new()).await;
        h.bus.set_service_present(true);
        h.settle().await;

        h.bus.emit_interfaces_added(
            "/org/bluez/hci0",
            adapter_interfaces("AA:BB:CC:DD:EE:FF", true),
        );
        h.bus.emit_interfaces_removed("/org/bluez/hci0", &[ADAPTER_INTERFACE]);
        h.bus.emit_interfaces_added(
            "/org/bluez/hci0",
            adapter_interfaces("AA:BB:CC:DD:EE:FF", false),
        );
        h.settle().await;

        let active = h.engine.active_adapter().unwrap();
        assert_eq!(active.object_path, "/org/bluez/hci0");
        assert!(!active.powered);
        assert_eq!(h.power_requests(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_pending_operations() {
        let bus = MockBus::new();
        bus.hold_property_sets();
        let mut h = Harness::new(bus).await;
        h.settle().await;

        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = results.clone();
        let callback: ResultCallback = Box::new(move |result| sink.lock().unwrap().push(result));
        h.engine
            .handle(EngineMessage::SetPower {
                path: "/org/bluez/hci0".into(),
                on: true,
                callback,
            })
            .await;
        assert_eq!(h.engine.in_flight(), 1);

        h.engine.shutdown();

        assert_eq!(*results.lock().unwrap(), vec![Err(HalError::Aborted)]);
        assert_eq!(h.engine.in_flight(), 0);
    }
}
