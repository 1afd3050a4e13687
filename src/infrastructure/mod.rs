pub mod bluez;
pub mod logging;
