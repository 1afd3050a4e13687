//! D-Bus Transport
//!
//! [`BusTransport`] implementation on top of a zbus connection to the system
//! (or session) bus.

use crate::domain::error::HalError;
use crate::domain::models::BusKind;
use crate::infrastructure::bluez::protocol::{
    self, ManagedObjects, PropertyValue, WireInterfaceMap, INTERFACES_ADDED,
    INTERFACES_REMOVED, OBJECT_MANAGER_INTERFACE, OBJECT_MANAGER_PATH, PROPERTIES_INTERFACE,
    SET_METHOD,
};
use crate::infrastructure::bluez::proxies::BluezObjectManagerProxy;
use crate::infrastructure::bluez::transport::{BusSignal, BusTransport, SignalSink, SignalWatch};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info, warn};
use zbus::fdo::DBusProxy;
use zbus::names::{BusName, UniqueName};
use zbus::zvariant::OwnedObjectPath;
use zbus::{Connection, Message};

pub struct DbusTransport {
    connection: Connection,
    service_name: String,
}

impl DbusTransport {
    /// Connect to the requested bus. This is the only step of `init` that
    /// waits on the bus.
    pub async fn connect(bus: BusKind, service_name: String) -> Result<Self, HalError> {
        let connection = match bus {
            BusKind::System => Connection::system().await,
            BusKind::Session => Connection::session().await,
        }
        .map_err(|e| HalError::Connection(e.to_string()))?;

        info!(
            bus = ?bus,
            unique_name = ?connection.unique_name().map(|n| n.to_string()),
            "D-Bus connection acquired"
        );

        Ok(Self {
            connection,
            service_name,
        })
    }

    async fn object_manager(&self) -> zbus::Result<BluezObjectManagerProxy<'static>> {
        BluezObjectManagerProxy::builder(&self.connection)
            .destination(self.service_name.clone())?
            .path(OBJECT_MANAGER_PATH)?
            .build()
            .await
    }
}

#[async_trait]
impl BusTransport for DbusTransport {
    async fn watch_service(&self, sink: SignalSink) -> Result<SignalWatch, HalError> {
        let dbus = DBusProxy::new(&self.connection)
            .await
            .map_err(|e| HalError::Connection(e.to_string()))?;

        // Subscribe before asking for the current owner so no change slips
        // through in between.
        let mut changes = dbus
            .receive_name_owner_changed_with_args(&[(0, self.service_name.as_str())])
            .await
            .map_err(|e| HalError::Connection(e.to_string()))?;

        let initial_owner = match BusName::try_from(self.service_name.as_str()) {
            Ok(name) => dbus.get_name_owner(name).await.ok(),
            Err(_) => None,
        };

        let service_name = self.service_name.clone();
        info!(service = %service_name, "Watching service name");

        Ok(SignalWatch::spawn(async move {
            let _dbus = dbus;

            let initial = match initial_owner {
                Some(owner) => BusSignal::ServiceAppeared {
                    owner: owner.to_string(),
                },
                None => BusSignal::ServiceVanished,
            };
            if !sink.emit(initial) {
                return;
            }

            while let Some(change) = changes.next().await {
                let args = match change.args() {
                    Ok(args) => args,
                    Err(e) => {
                        warn!("Malformed NameOwnerChanged signal: {}", e);
                        continue;
                    }
                };

                let new_owner: Option<&UniqueName<'_>> = Option::as_ref(args.new_owner());
                let signal = match new_owner {
                    Some(owner) => BusSignal::ServiceAppeared {
                        owner: owner.to_string(),
                    },
                    None => BusSignal::ServiceVanished,
                };
                if !sink.emit(signal) {
                    break;
                }
            }

            debug!(service = %service_name, "Name owner stream ended");
        }))
    }

    async fn subscribe_object_manager(&self, sink: SignalSink) -> Result<SignalWatch, HalError> {
        let proxy = self
            .object_manager()
            .await
            .map_err(|e| HalError::Subscription(e.to_string()))?;

        // A single stream for both signals keeps added/removed in bus order.
        let mut signals = proxy
            .inner()
            .receive_all_signals()
            .await
            .map_err(|e| HalError::Subscription(e.to_string()))?;

        info!(
            generation = sink.generation(),
            interface = OBJECT_MANAGER_INTERFACE,
            "Subscribed to object manager signals"
        );

        Ok(SignalWatch::spawn(async move {
            let _proxy = proxy;

            while let Some(message) = signals.next().await {
                let Some(signal) = decode_object_manager_signal(&message) else {
                    continue;
                };
                if !sink.emit(signal) {
                    break;
                }
            }

            debug!("ObjectManager signal stream ended");
        }))
    }

    async fn get_managed_objects(&self) -> Result<ManagedObjects, HalError> {
        let proxy = self.object_manager().await?;
        let wire = proxy.get_managed_objects().await?;
        Ok(protocol::managed_objects_from_wire(&wire))
    }

    async fn set_property(
        &self,
        path: &str,
        interface: &str,
        property: &str,
        value: PropertyValue,
    ) -> Result<(), HalError> {
        let value = value.to_value().ok_or_else(|| {
            HalError::InvalidParams(format!("{property} value cannot be encoded"))
        })?;

        self.connection
            .call_method(
                Some(self.service_name.as_str()),
                path,
                Some(PROPERTIES_INTERFACE),
                SET_METHOD,
                &(interface, property, value),
            )
            .await?;

        Ok(())
    }
}

fn decode_object_manager_signal(message: &Message) -> Option<BusSignal> {
    let header = message.header();
    let member = header.member()?;

    match member.as_str() {
        INTERFACES_ADDED => {
            let body = message.body();
            match body.deserialize::<(OwnedObjectPath, WireInterfaceMap)>() {
                Ok((path, interfaces)) => Some(BusSignal::InterfacesAdded {
                    path: path.as_str().to_string(),
                    interfaces: protocol::interface_map_from_wire(&interfaces),
                }),
                Err(e) => {
                    warn!("Malformed {} signal: {}", INTERFACES_ADDED, e);
                    None
                }
            }
        }
        INTERFACES_REMOVED => {
            let body = message.body();
            match body.deserialize::<(OwnedObjectPath, Vec<String>)>() {
                Ok((path, interfaces)) => Some(BusSignal::InterfacesRemoved {
                    path: path.as_str().to_string(),
                    interfaces,
                }),
                Err(e) => {
                    warn!("Malformed {} signal: {}", INTERFACES_REMOVED, e);
                    None
                }
            }
        }
        _ => None,
    }
}
