// =============================================================================
// in_flight.rs — ONE REQUEST PER SHIPMENT AT A TIME
// =============================================================================
//
// The busy flag, made impossible to leave stuck. Taking the slot hands back a
// guard; dropping the guard frees the slot. Early returns, `?`, errors and
// panics all run Drop, so there is no path that forgets to clean up.
//
// The registry is shared (Clone is cheap) so several controllers looking at
// the same shipment also block each other.
// =============================================================================

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::trace;

use crate::models::ShipmentId;

#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry {
    busy: Arc<Mutex<HashSet<ShipmentId>>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `id`. `None` when a request is already outstanding.
    pub fn try_begin(&self, id: &ShipmentId) -> Option<InFlightGuard> {
        let mut busy = self.busy.lock();
        if !busy.insert(id.clone()) {
            return None;
        }
        trace!(shipment_id = %id, "In-flight slot claimed");
        Some(InFlightGuard {
            busy: Arc::clone(&self.busy),
            id: id.clone(),
        })
    }

    pub fn is_in_flight(&self, id: &ShipmentId) -> bool {
        self.busy.lock().contains(id)
    }

    pub fn outstanding(&self) -> usize {
        self.busy.lock().len()
    }
}

/// Holds the in-flight slot for one shipment until dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    busy: Arc<Mutex<HashSet<ShipmentId>>>,
    id: ShipmentId,
}

impl InFlightGuard {
    pub fn shipment_id(&self) -> &ShipmentId {
        &self.id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.busy.lock().remove(&self.id);
        trace!(shipment_id = %self.id, "In-flight slot released");
    }
}
