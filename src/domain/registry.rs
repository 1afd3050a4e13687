//! Adapter Registry
//!
//! Holds zero or one active adapter. The first qualifying adapter wins; later
//! discoveries are rejected until the slot is cleared.

use crate::domain::models::AdapterRecord;
use tracing::{debug, info};

/// Why a candidate adapter was not stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejected {
    /// Another adapter is already active.
    Occupied { active_path: String },
    /// The candidate carried no hardware address.
    MissingAddress,
}

#[derive(Debug, Default)]
pub struct AdapterRegistry {
    active: Option<AdapterRecord>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `record` as the active adapter if the slot is free.
    pub fn try_register(&mut self, record: AdapterRecord) -> Result<&AdapterRecord, Rejected> {
        if let Some(active) = &self.active {
            info!(
                active = %active.object_path,
                candidate = %record.object_path,
                "Already have an active adapter, ignoring new one"
            );
            return Err(Rejected::Occupied {
                active_path: active.object_path.clone(),
            });
        }

        if record.address.is_empty() {
            info!(
                path = %record.object_path,
                "Adapter did not have an address, not using"
            );
            return Err(Rejected::MissingAddress);
        }

        info!("Configured active adapter: {}", record);
        Ok(self.active.insert(record))
    }

    pub fn clear(&mut self) {
        if let Some(previous) = self.active.take() {
            debug!(path = %previous.object_path, "Cleared active adapter");
        }
    }

    pub fn is_active(&self, path: &str) -> bool {
        self.active
            .as_ref()
            .map_or(false, |active| active.object_path == path)
    }

    pub fn active(&self) -> Option<&AdapterRecord> {
        self.active.as_ref()
    }
}
