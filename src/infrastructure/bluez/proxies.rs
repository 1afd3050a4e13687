//! zbus proxy definitions for the BlueZ object manager.

use crate::infrastructure::bluez::protocol::WireManagedObjects;
use crate::infrastructure::bluez::protocol::WireInterfaceMap;
use zbus::proxy;
use zbus::zvariant::OwnedObjectPath;

/// Proxy for `org.freedesktop.DBus.ObjectManager` on the BlueZ service.
///
/// Used to enumerate adapters and to receive InterfacesAdded /
/// InterfacesRemoved signals for live updates.
#[proxy(
    interface = "org.freedesktop.DBus.ObjectManager",
    default_service = "org.bluez",
    default_path = "/"
)]
pub trait BluezObjectManager {
    /// Returns `{ object_path: { interface_name: { property: value } } }`
    fn get_managed_objects(&self) -> zbus::Result<WireManagedObjects>;

    #[zbus(signal)]
    fn interfaces_added(
        &self,
        object_path: OwnedObjectPath,
        interfaces: WireInterfaceMap,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    fn interfaces_removed(
        &self,
        object_path: OwnedObjectPath,
        interfaces: Vec<String>,
    ) -> zbus::Result<()>;
}
