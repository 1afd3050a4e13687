//! Event Notifier
//!
//! Synchronous fan-out of global HAL events to the one configured callback.

use crate::domain::models::{EventCallback, HalEvent};
use tracing::debug;

#[derive(Clone, Default)]
pub struct EventNotifier {
    callback: Option<EventCallback>,
}

impl EventNotifier {
    pub fn new(callback: Option<EventCallback>) -> Self {
        Self { callback }
    }

    /// Invoke the callback on the calling thread. No queueing: a blocking
    /// callback blocks event delivery.
    pub fn notify(&self, event: HalEvent) {
        debug!(?event, "Raising HAL event");
        if let Some(callback) = &self.callback {
            callback(event);
        }
    }
}
