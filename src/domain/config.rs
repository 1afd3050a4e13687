use crate::domain::error::HalError;
use crate::domain::models::{BusKind, EventCallback, HalEvent};
use crate::infrastructure::bluez::protocol::SERVICE_NAME;
use std::fmt;
use std::sync::Arc;
use zbus::names::WellKnownName;

/// Configuration captured by [`BleHal::init`](crate::BleHal::init).
///
/// The event callback runs on the HAL's event-loop thread and must not block;
/// any context it needs is captured by the closure.
#[derive(Clone)]
pub struct HalConfig {
    pub(crate) on_event: Option<EventCallback>,
    pub(crate) bus: BusKind,
    pub(crate) service_name: String,
}

impl Default for HalConfig {
    fn default() -> Self {
        Self {
            on_event: None,
            bus: BusKind::System,
            service_name: SERVICE_NAME.to_string(),
        }
    }
}

impl HalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the callback for global HAL events (service up/down).
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(HalEvent) + Send + Sync + 'static,
    {
        self.on_event = Some(Arc::new(callback));
        self
    }

    pub fn bus(mut self, bus: BusKind) -> Self {
        self.bus = bus;
        self
    }

    /// Override the watched well-known name (defaults to `org.bluez`).
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    pub(crate) fn validate(&self) -> Result<(), HalError> {
        WellKnownName::try_from(self.service_name.as_str())
            .map(|_| ())
            .map_err(|e| {
                HalError::InvalidConfig(format!(
                    "service name {:?} is not a well-known bus name: {}",
                    self.service_name, e
                ))
            })
    }
}

impl fmt::Debug for HalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HalConfig")
            .field("on_event", &self.on_event.as_ref().map(|_| "<callback>"))
            .field("bus", &self.bus)
            .field("service_name", &self.service_name)
            .finish()
    }
}
