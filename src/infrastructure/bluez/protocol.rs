//! BlueZ Wire Protocol
//!
//! Bus names, interfaces and property names used to talk to BlueZ, and the
//! decoder that turns the nested `a{sa{sv}}` payloads into [`AdapterRecord`]s.
//!
//! All tolerance for unexpected payload shapes lives here: unknown
//! interfaces and properties are skipped, values of the wrong type are
//! ignored and over-length strings are truncated.

use crate::domain::models::{AdapterRecord, MAX_ADDRESS_LEN, MAX_NAME_LEN, MAX_PATH_LEN};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace};
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue, Value};

/// Well-known bus name of the BlueZ daemon
pub const SERVICE_NAME: &str = "org.bluez";

/// Object implementing the object manager (BlueZ exports it at the root)
pub const OBJECT_MANAGER_PATH: &str = "/";

pub const OBJECT_MANAGER_INTERFACE: &str = "org.freedesktop.DBus.ObjectManager";

pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Interface implemented by every adapter object (e.g. `/org/bluez/hci0`)
pub const ADAPTER_INTERFACE: &str = "org.bluez.Adapter1";

pub const INTERFACES_ADDED: &str = "InterfacesAdded";
pub const INTERFACES_REMOVED: &str = "InterfacesRemoved";
pub const SET_METHOD: &str = "Set";

/// Adapter1 property names
pub mod property {
    pub const ADDRESS: &str = "Address";
    pub const NAME: &str = "Name";
    pub const POWERED: &str = "Powered";
}

/// A single decoded D-Bus variant.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Str(String),
    Bool(bool),
    ObjectPath(String),
    Byte(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    Double(f64),
    StrArray(Vec<String>),
    /// Anything else, kept as its type signature for diagnostics
    Other(String),
}

/// `a{sv}`: property name → value
pub type PropertyMap = BTreeMap<String, PropertyValue>;
/// `a{sa{sv}}`: interface name → properties
pub type InterfaceMap = BTreeMap<String, PropertyMap>;
/// `a{oa{sa{sv}}}`: object path → interfaces, ordered by path
pub type ManagedObjects = BTreeMap<String, InterfaceMap>;

/// Raw shapes as they come off the wire through zbus.
pub type WirePropertyMap = HashMap<String, OwnedValue>;
pub type WireInterfaceMap = HashMap<String, WirePropertyMap>;
pub type WireManagedObjects = HashMap<OwnedObjectPath, WireInterfaceMap>;

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Encode back into a variant for method arguments. Returns `None` for
    /// values that cannot be sent (`Other`, invalid object paths).
    pub fn to_value(&self) -> Option<Value<'static>> {
        let value = match self {
            Self::Str(s) => Value::from(s.clone()),
            Self::Bool(b) => Value::from(*b),
            Self::ObjectPath(p) => Value::from(ObjectPath::try_from(p.clone()).ok()?),
            Self::Byte(v) => Value::from(*v),
            Self::I16(v) => Value::from(*v),
            Self::U16(v) => Value::from(*v),
            Self::I32(v) => Value::from(*v),
            Self::U32(v) => Value::from(*v),
            Self::I64(v) => Value::from(*v),
            Self::U64(v) => Value::from(*v),
            Self::Double(v) => Value::from(*v),
            Self::StrArray(_) | Self::Other(_) => return None,
        };
        Some(value)
    }
}

impl From<&Value<'_>> for PropertyValue {
    fn from(value: &Value<'_>) -> Self {
        match value {
            Value::Str(s) => Self::Str(s.as_str().to_string()),
            Value::Bool(b) => Self::Bool(*b),
            Value::ObjectPath(p) => Self::ObjectPath(p.as_str().to_string()),
            Value::U8(v) => Self::Byte(*v),
            Value::I16(v) => Self::I16(*v),
            Value::U16(v) => Self::U16(*v),
            Value::I32(v) => Self::I32(*v),
            Value::U32(v) => Self::U32(*v),
            Value::I64(v) => Self::I64(*v),
            Value::U64(v) => Self::U64(*v),
            Value::F64(v) => Self::Double(*v),
            // Variants nested in variants are unwrapped.
            Value::Value(inner) => Self::from(inner.as_ref()),
            Value::Array(array) => {
                let strings: Option<Vec<String>> = array
                    .iter()
                    .map(|item| match item {
                        Value::Str(s) => Some(s.as_str().to_string()),
                        _ => None,
                    })
                    .collect();
                match strings {
                    Some(strings) => Self::StrArray(strings),
                    None => Self::Other(value.value_signature().to_string()),
                }
            }
            other => Self::Other(other.value_signature().to_string()),
        }
    }
}

pub fn property_map_from_wire(wire: &WirePropertyMap) -> PropertyMap {
    wire.iter()
        .map(|(name, value)| {
            let value: &Value<'_> = value;
            (name.clone(), PropertyValue::from(value))
        })
        .collect()
}

pub fn interface_map_from_wire(wire: &WireInterfaceMap) -> InterfaceMap {
    wire.iter()
        .map(|(interface, properties)| (interface.clone(), property_map_from_wire(properties)))
        .collect()
}

pub fn managed_objects_from_wire(wire: &WireManagedObjects) -> ManagedObjects {
    wire.iter()
        .map(|(path, interfaces)| (path.as_str().to_string(), interface_map_from_wire(interfaces)))
        .collect()
}

/// Result of decoding one object or one interface's properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Adapter(AdapterRecord),
    /// The object does not implement `org.bluez.Adapter1`.
    NotAnAdapter,
    /// An adapter without the properties needed to use it (no address).
    Incomplete,
}

/// Decode the `org.bluez.Adapter1` properties of the object at `path`.
pub fn decode_adapter(path: &str, properties: &PropertyMap) -> Decoded {
    let mut record = AdapterRecord {
        object_path: truncate_utf8(path, MAX_PATH_LEN),
        ..Default::default()
    };

    for (name, value) in properties {
        match (name.as_str(), value) {
            (property::ADDRESS, PropertyValue::Str(address)) => {
                record.address = truncate_utf8(address, MAX_ADDRESS_LEN);
            }
            (property::NAME, PropertyValue::Str(adapter_name)) => {
                record.name = truncate_utf8(adapter_name, MAX_NAME_LEN);
            }
            (property::POWERED, PropertyValue::Bool(powered)) => {
                record.powered = *powered;
            }
            (property::ADDRESS | property::NAME | property::POWERED, other) => {
                debug!(path, property = %name, value = ?other, "Ignoring adapter property of unexpected type");
            }
            _ => trace!(path, property = %name, "Skipping adapter property"),
        }
    }

    if record.address.is_empty() {
        Decoded::Incomplete
    } else {
        Decoded::Adapter(record)
    }
}

/// Decode an object's full interface map, looking only at the adapter
/// interface.
pub fn decode_object(path: &str, interfaces: &InterfaceMap) -> Decoded {
    match interfaces.get(ADAPTER_INTERFACE) {
        Some(properties) => decode_adapter(path, properties),
        None => Decoded::NotAnAdapter,
    }
}

/// Truncate `s` to at most `max` bytes without splitting a character.
pub fn truncate_utf8(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
