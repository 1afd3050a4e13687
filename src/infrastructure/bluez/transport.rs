//! Bus Transport Seam
//!
//! The engine never touches zbus directly: everything it needs from the bus
//! goes through [`BusTransport`], and everything the bus reports comes back
//! as an [`EngineMessage`] on the engine's channel.

use crate::domain::error::HalError;
use crate::domain::models::ResultCallback;
use crate::infrastructure::bluez::protocol::{InterfaceMap, ManagedObjects, PropertyValue};
use async_trait::async_trait;
use std::future::Future;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Notifications raised by the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum BusSignal {
    /// The watched service name gained an owner.
    ServiceAppeared { owner: String },
    /// The watched service name lost its owner (or had none when the
    /// watch started).
    ServiceVanished,
    InterfacesAdded {
        path: String,
        interfaces: InterfaceMap,
    },
    InterfacesRemoved {
        path: String,
        interfaces: Vec<String>,
    },
}

/// Everything the engine task reacts to.
pub(crate) enum EngineMessage {
    Bus {
        generation: u64,
        signal: BusSignal,
    },
    ManagedObjects {
        generation: u64,
        result: Result<ManagedObjects, HalError>,
    },
    SetPower {
        path: String,
        on: bool,
        callback: ResultCallback,
    },
    OperationComplete {
        id: u64,
        result: Result<(), HalError>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

pub(crate) type EngineSender = mpsc::UnboundedSender<EngineMessage>;
pub(crate) type EngineReceiver = mpsc::UnboundedReceiver<EngineMessage>;

/// Forwards bus notifications into the engine, tagged with the subscription
/// generation they belong to.
#[derive(Clone)]
pub struct SignalSink {
    tx: EngineSender,
    generation: u64,
}

impl SignalSink {
    pub(crate) fn new(tx: EngineSender, generation: u64) -> Self {
        Self { tx, generation }
    }

    /// Returns `false` once the engine is gone; callers should stop
    /// forwarding.
    pub fn emit(&self, signal: BusSignal) -> bool {
        self.tx
            .send(EngineMessage::Bus {
                generation: self.generation,
                signal,
            })
            .is_ok()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Handle to a running signal watch. Releasing or dropping it stops the
/// forwarding task.
#[derive(Debug)]
pub struct SignalWatch {
    task: Option<JoinHandle<()>>,
}

impl SignalWatch {
    /// Run `forwarder` on the current runtime for as long as the handle lives.
    pub fn spawn<F>(forwarder: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            task: Some(tokio::spawn(forwarder)),
        }
    }

    pub fn release(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SignalWatch {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Operations the engine needs from the message bus.
#[async_trait]
pub trait BusTransport: Send + Sync + 'static {
    /// Watch ownership of the management service name. The current state is
    /// reported once immediately, then every change.
    async fn watch_service(&self, sink: SignalSink) -> Result<SignalWatch, HalError>;

    /// Subscribe to `InterfacesAdded` / `InterfacesRemoved` from the
    /// service's object manager. Signals must be forwarded in bus order.
    async fn subscribe_object_manager(&self, sink: SignalSink) -> Result<SignalWatch, HalError>;

    /// `GetManagedObjects` on the service's object manager.
    async fn get_managed_objects(&self) -> Result<ManagedObjects, HalError>;

    /// `org.freedesktop.DBus.Properties.Set(interface, property, value)` on
    /// `path`.
    async fn set_property(
        &self,
        path: &str,
        interface: &str,
        property: &str,
        value: PropertyValue,
    ) -> Result<(), HalError>;
}
