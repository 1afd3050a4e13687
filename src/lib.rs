//! Bluetooth adapter HAL for Linux hosts running BlueZ.
//!
//! Watches the BlueZ daemon on the system bus, selects the first adapter
//! with a hardware address, powers it on if needed and reports service
//! up/down events to the host.
//!
//! ```no_run
//! use ble_hal::{BleHal, HalConfig, HalEvent};
//!
//! let mut hal = BleHal::new();
//! let config = HalConfig::new().on_event(|event| match event {
//!     HalEvent::ServiceUp => println!("bluetooth up"),
//!     HalEvent::ServiceDown => println!("bluetooth down"),
//!     _ => {}
//! });
//! hal.init(config, None).expect("bus unavailable");
//! hal.set_adapter_power("/org/bluez/hci0", true, |result| {
//!     println!("power on: {result:?}");
//! })
//! .ok();
//! hal.deinit();
//! ```

pub mod domain;
pub mod infrastructure;

pub use domain::config::HalConfig;
pub use domain::error::HalError;
pub use domain::models::{AdapterRecord, BusKind, HalEvent, InitStatus, ServiceState};
pub use infrastructure::bluez::BleHal;
