use std::fmt;
use std::sync::Arc;

/// Upper bound (in bytes) for a stored object path.
pub const MAX_PATH_LEN: usize = 255;
/// `XX:XX:XX:XX:XX:XX`
pub const MAX_ADDRESS_LEN: usize = 17;
/// BlueZ limits adapter names to 248 bytes.
pub const MAX_NAME_LEN: usize = 248;

/// One adapter as reported by the management service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterRecord {
    /// D-Bus object path (e.g. `/org/bluez/hci0`)
    pub object_path: String,
    /// Hardware address in `XX:XX:XX:XX:XX:XX` form
    pub address: String,
    /// Adapter's Bluetooth name, may be empty
    pub name: String,
    /// Last known power state
    pub powered: bool,
}

impl fmt::Display for AdapterRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, name: {:?}, powered: {})",
            self.object_path,
            self.address,
            self.name,
            if self.powered { "on" } else { "off" }
        )
    }
}

/// Whether the management service currently owns its bus name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceState {
    #[default]
    Down,
    Up,
}

/// Global events delivered to the configured event callback.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalEvent {
    /// The management service appeared and discovery has been started.
    ServiceUp,
    /// The management service left the bus.
    ServiceDown,
}

/// Successful outcomes of [`BleHal::init`](crate::BleHal::init).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStatus {
    Initialized,
    /// A previous `init` is still in effect; nothing was changed.
    AlreadyInitialized,
}

/// Which message bus to connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusKind {
    #[default]
    System,
    /// Useful for test rigs that run a fake management service.
    Session,
}

pub type EventCallback = Arc<dyn Fn(HalEvent) + Send + Sync + 'static>;

pub type ResultCallback =
    Box<dyn FnOnce(Result<(), crate::domain::error::HalError>) + Send + 'static>;
