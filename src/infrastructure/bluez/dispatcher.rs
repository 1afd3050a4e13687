//! Async Operation Dispatcher
//!
//! Issues property mutations against the bus and delivers each result to the
//! caller's callback exactly once.

use crate::domain::error::HalError;
use crate::domain::models::ResultCallback;
use crate::infrastructure::bluez::protocol::{property, PropertyValue, ADAPTER_INTERFACE};
use crate::infrastructure::bluez::transport::{BusTransport, EngineMessage, EngineSender};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One in-flight mutation. Owned by the dispatcher until its callback fires.
struct PendingOperation {
    path: String,
    description: &'static str,
    callback: ResultCallback,
    /// The bus call; holds the transport until it returns.
    call: JoinHandle<()>,
}

pub(crate) struct Dispatcher<B> {
    bus: Arc<B>,
    tx: EngineSender,
    pending: HashMap<u64, PendingOperation>,
    next_id: u64,
}

impl<B: BusTransport> Dispatcher<B> {
    pub fn new(bus: Arc<B>, tx: EngineSender) -> Self {
        Self {
            bus,
            tx,
            pending: HashMap::new(),
            next_id: 1,
        }
    }

    /// Request `Powered = on` for the adapter at `path`. The reply comes back
    /// to the engine as [`EngineMessage::OperationComplete`].
    pub fn set_adapter_power(&mut self, path: &str, on: bool, callback: ResultCallback) {
        if path.is_empty() {
            error!("Adapter path cannot be empty for set_adapter_power");
            callback(Err(HalError::InvalidParams(
                "adapter path cannot be empty".to_string(),
            )));
            return;
        }

        let id = self.next_id;
        self.next_id += 1;
        let description = if on { "SetPowerOn" } else { "SetPowerOff" };

        info!(
            path,
            id,
            "Attempting to set 'Powered' property to {}",
            if on { "ON" } else { "OFF" }
        );

        let bus = self.bus.clone();
        let tx = self.tx.clone();
        let target = path.to_string();
        let call = tokio::spawn(async move {
            let result = bus
                .set_property(
                    &target,
                    ADAPTER_INTERFACE,
                    property::POWERED,
                    PropertyValue::Bool(on),
                )
                .await;
            // The engine may already be gone after deinit; the reply is dropped.
            let _ = tx.send(EngineMessage::OperationComplete { id, result });
        });

        // The reply is only handled by the engine after this returns.
        self.pending.insert(
            id,
            PendingOperation {
                path: path.to_string(),
                description,
                callback,
                call,
            },
        );
    }

    /// Deliver the reply for operation `id`.
    pub fn complete(&mut self, id: u64, result: Result<(), HalError>) {
        let Some(operation) = self.pending.remove(&id) else {
            debug!(id, "Reply for unknown or abandoned operation dropped");
            return;
        };

        match &result {
            Ok(()) => info!(
                path = %operation.path,
                operation = operation.description,
                "'Powered' property set successfully"
            ),
            Err(e) => error!(
                path = %operation.path,
                operation = operation.description,
                "Failed to set 'Powered' property: {}",
                e
            ),
        }
        (operation.callback)(result);
    }

    /// Cancel every outstanding bus call and complete its operation with
    /// [`HalError::Aborted`].
    pub fn abort_all(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        warn!(count = self.pending.len(), "Aborting in-flight operations");
        let mut ids: Vec<u64> = self.pending.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            if let Some(operation) = self.pending.remove(&id) {
                operation.call.abort();
                (operation.callback)(Err(HalError::Aborted));
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

/// Completion callback for power requests the engine issues on its own.
pub(crate) fn log_result(description: &'static str) -> ResultCallback {
    Box::new(move |result| match result {
        Ok(()) => info!("Operation '{}' completed successfully", description),
        Err(e) => warn!("Operation '{}' failed: {}", description, e),
    })
}
