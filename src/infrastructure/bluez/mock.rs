//! Scripted in-memory bus used by the engine tests.
//!
//! Signals are pushed through a per-watch channel and forwarded by a task
//! owned by the returned [`SignalWatch`], so releasing a watch really stops
//! delivery, like the D-Bus transport.

use crate::domain::error::HalError;
use crate::infrastructure::bluez::protocol::{
    property, InterfaceMap, ManagedObjects, PropertyMap, PropertyValue, ADAPTER_INTERFACE,
};
use crate::infrastructure::bluez::transport::{BusSignal, BusTransport, SignalSink, SignalWatch};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};

/// A recorded `Properties.Set` call.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySet {
    pub path: String,
    pub interface: String,
    pub property: String,
    pub value: PropertyValue,
}

#[derive(Default)]
struct MockState {
    present: bool,
    owner_serial: u32,
    objects: ManagedObjects,
    fail_subscriptions: bool,
    set_failure: Option<HalError>,
    hold_sets: bool,
    presence_tx: Option<mpsc::UnboundedSender<BusSignal>>,
    object_manager_tx: Option<mpsc::UnboundedSender<BusSignal>>,
    property_sets: Vec<PropertySet>,
    subscriptions: usize,
    enumerations: usize,
}

impl MockState {
    fn presence_signal(&mut self) -> BusSignal {
        if self.present {
            self.owner_serial += 1;
            BusSignal::ServiceAppeared {
                owner: format!(":1.{}", self.owner_serial),
            }
        } else {
            BusSignal::ServiceVanished
        }
    }
}

#[derive(Clone)]
pub struct MockBus {
    state: Arc<Mutex<MockState>>,
    enumeration_hold: Arc<watch::Sender<bool>>,
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBus {
    pub fn new() -> Self {
        let (hold, _) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            enumeration_hold: Arc::new(hold),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Change ownership of the service name. Reported to an attached watch
    /// on every call, including repeats.
    pub fn set_service_present(&self, present: bool) {
        let mut state = self.state();
        state.present = present;
        let signal = state.presence_signal();
        if let Some(tx) = &state.presence_tx {
            let _ = tx.send(signal);
        }
    }

    pub fn add_object(&self, path: &str, interfaces: InterfaceMap) {
        self.state().objects.insert(path.to_string(), interfaces);
    }

    pub fn clear_objects(&self) {
        self.state().objects.clear();
    }

    pub fn emit_interfaces_added(&self, path: &str, interfaces: InterfaceMap) {
        self.emit_object_manager(BusSignal::InterfacesAdded {
            path: path.to_string(),
            interfaces,
        });
    }

    pub fn emit_interfaces_removed(&self, path: &str, interfaces: &[&str]) {
        self.emit_object_manager(BusSignal::InterfacesRemoved {
            path: path.to_string(),
            interfaces: interfaces.iter().map(|name| name.to_string()).collect(),
        });
    }

    fn emit_object_manager(&self, signal: BusSignal) {
        if let Some(tx) = &self.state().object_manager_tx {
            let _ = tx.send(signal);
        }
    }

    pub fn fail_subscriptions(&self, fail: bool) {
        self.state().fail_subscriptions = fail;
    }

    pub fn fail_property_sets(&self, error: HalError) {
        self.state().set_failure = Some(error);
    }

    /// `Properties.Set` calls are recorded but never answered.
    pub fn hold_property_sets(&self) {
        self.state().hold_sets = true;
    }

    /// `GetManagedObjects` snapshots the objects when called but does not
    /// answer until [`MockBus::release_enumerations`].
    pub fn hold_enumerations(&self) {
        self.enumeration_hold.send_replace(true);
    }

    pub fn release_enumerations(&self) {
        self.enumeration_hold.send_replace(false);
    }

    pub fn property_sets(&self) -> Vec<PropertySet> {
        self.state().property_sets.clone()
    }

    pub fn subscriptions(&self) -> usize {
        self.state().subscriptions
    }

    pub fn enumerations(&self) -> usize {
        self.state().enumerations
    }
}

fn forward(sink: SignalSink, mut rx: mpsc::UnboundedReceiver<BusSignal>) -> SignalWatch {
    SignalWatch::spawn(async move {
        while let Some(signal) = rx.recv().await {
            if !sink.emit(signal) {
                break;
            }
        }
    })
}

#[async_trait]
impl BusTransport for MockBus {
    async fn watch_service(&self, sink: SignalSink) -> Result<SignalWatch, HalError> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.state();
            let initial = state.presence_signal();
            let _ = tx.send(initial);
            state.presence_tx = Some(tx);
        }
        Ok(forward(sink, rx))
    }

    async fn subscribe_object_manager(&self, sink: SignalSink) -> Result<SignalWatch, HalError> {
        let rx = {
            let mut state = self.state();
            if state.fail_subscriptions {
                return Err(HalError::Subscription("match rule rejected".to_string()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            state.object_manager_tx = Some(tx);
            state.subscriptions += 1;
            rx
        };
        Ok(forward(sink, rx))
    }

    async fn get_managed_objects(&self) -> Result<ManagedObjects, HalError> {
        let snapshot = {
            let mut state = self.state();
            state.enumerations += 1;
            state.objects.clone()
        };
        let mut hold = self.enumeration_hold.subscribe();
        let _ = hold.wait_for(|held| !*held).await;
        Ok(snapshot)
    }

    async fn set_property(
        &self,
        path: &str,
        interface: &str,
        property: &str,
        value: PropertyValue,
    ) -> Result<(), HalError> {
        let (hold, failure) = {
            let mut state = self.state();
            state.property_sets.push(PropertySet {
                path: path.to_string(),
                interface: interface.to_string(),
                property: property.to_string(),
                value,
            });
            (state.hold_sets, state.set_failure.clone())
        };
        if hold {
            futures::future::pending::<()>().await;
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Interface map of an object implementing only `org.bluez.Adapter1`.
pub fn adapter_interfaces(address: &str, powered: bool) -> InterfaceMap {
    let mut properties = PropertyMap::new();
    properties.insert(
        property::ADDRESS.to_string(),
        PropertyValue::Str(address.to_string()),
    );
    properties.insert(
        property::NAME.to_string(),
        PropertyValue::Str("hal-test".to_string()),
    );
    properties.insert(property::POWERED.to_string(), PropertyValue::Bool(powered));
    properties.insert("Discoverable".to_string(), PropertyValue::Bool(false));

    let mut interfaces = InterfaceMap::new();
    interfaces.insert(ADAPTER_INTERFACE.to_string(), properties);
    interfaces.insert("org.freedesktop.DBus.Introspectable".to_string(), PropertyMap::new());
    interfaces
}
