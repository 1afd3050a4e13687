//! BlueZ Module
//!
//! Tracks the BlueZ daemon on the message bus, picks the adapter to use and
//! powers it on.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                        BleHal                            │
//! │  (init / deinit / set_adapter_power, owns the channel)   │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ EngineMessage
//!                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                        Engine                            │
//! │  (single task, owns all state)                           │
//! └──────┬──────────────┬──────────────┬──────────────┬─────┘
//!        │              │              │              │
//!        ▼              ▼              ▼              ▼
//! ┌────────────┐ ┌────────────┐ ┌────────────┐ ┌──────────┐
//! │  Watcher   │ │ Discovery  │ │ Dispatcher │ │ Notifier │
//! │            │ │            │ │            │ │          │
//! │ - name     │ │ - signals  │ │ - Set      │ │ - up /   │
//! │   owner    │ │ - enumerate│ │   Powered  │ │   down   │
//! └────────────┘ └────────────┘ └────────────┘ └──────────┘
//!                       │
//!                       ▼
//!              ┌────────────────┐
//!              │  BusTransport  │  (zbus in production)
//!              └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Bus names, interface constants and the adapter decoder
//! - [`transport`] - The bus seam and the engine's message types
//! - [`dbus`] - zbus implementation of the transport
//! - [`service`] - Host-facing [`BleHal`] handle

pub mod dbus;
mod discovery;
mod dispatcher;
mod engine;
pub mod notifier;
pub mod protocol;
pub mod proxies;
pub mod service;
pub mod transport;
mod watcher;

#[cfg(test)]
pub(crate) mod mock;

pub use service::BleHal;
