// =============================================================================
// reconcile.rs — LOCAL OPTIMISM MEETS SERVER REALITY
// =============================================================================
//
// Two reducers, both pure:
//
// - `merge` folds a partial record from a transition endpoint into the
//   current record. Shallow, field by field, server wins. The id never
//   changes.
//
// - `reconcile_refetch` handles a full refetch. The server copy is adopted
//   wholesale, every time. If it differs from what we had locally (someone
//   else cancelled, the counterparty moved first, an optimistic write never
//   landed) a `StaleNotice` says so. That notice is informational, not an
//   error.
// =============================================================================

use serde::Serialize;
use tracing::warn;

use crate::models::{CancelledBy, ShipmentPatch, ShipmentRecord, ShipmentStatus};

/// Fold `patch` into `record`, returning a new record.
pub fn merge(record: &ShipmentRecord, patch: &ShipmentPatch) -> ShipmentRecord {
    let mut next = record.clone();

    if let Some(id) = &patch.id {
        if *id != record.id {
            warn!(
                local_id = %record.id,
                patch_id = %id,
                "Patch carries a different shipment id; keeping the local id"
            );
        }
    }

    if let Some(status) = patch.status {
        next.status = status;
    }

    if let Some(v) = patch.pickup_requested {
        next.pickup_requested = v;
    }
    if let Some(v) = patch.pickup_confirmed {
        next.pickup_confirmed = v;
    }
    if let Some(v) = patch.delivery_requested {
        next.delivery_requested = v;
    }
    if let Some(v) = patch.delivery_confirmed {
        next.delivery_confirmed = v;
    }

    if let Some(v) = patch.pickup_requested_at {
        next.pickup_requested_at = v;
    }
    if let Some(v) = patch.pickup_confirmed_at {
        next.pickup_confirmed_at = v;
    }
    if let Some(v) = patch.delivery_requested_at {
        next.delivery_requested_at = v;
    }
    if let Some(v) = patch.delivery_confirmed_at {
        next.delivery_confirmed_at = v;
    }
    if let Some(v) = patch.completed_at {
        next.completed_at = v;
    }
    if let Some(v) = patch.cancelled_at {
        next.cancelled_at = v;
    }

    if let Some(v) = &patch.cancellation_reason {
        next.cancellation_reason = v.clone();
    }
    if let Some(v) = patch.cancelled_by {
        next.cancelled_by = v;
    }

    if let Some(ratings) = &patch.ratings {
        next.ratings = ratings.clone();
    }
    if let Some(offer) = &patch.offer {
        next.offer = Some(offer.clone());
    }
    if let Some(cargo_post) = &patch.cargo_post {
        next.cargo_post = Some(cargo_post.clone());
    }

    next
}

/// How a refetched record differs from the local one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Divergence {
    /// Someone cancelled the shipment behind our back.
    CancelledRemotely,
    /// The server is further along than we knew (the other party acted).
    Advanced,
    /// The server is behind our local copy: an optimistic write did not stick.
    Regressed,
}

/// Informational notice raised when a refetch disagrees with local state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaleNotice {
    pub divergence: Divergence,
    pub local_status: ShipmentStatus,
    pub server_status: ShipmentStatus,
    pub cancelled_by: Option<CancelledBy>,
}

impl StaleNotice {
    pub fn message(&self) -> String {
        match self.divergence {
            Divergence::CancelledRemotely => match self.cancelled_by {
                Some(by) => format!("This shipment was cancelled by the {by}."),
                None => "This shipment was cancelled.".to_string(),
            },
            Divergence::Advanced => format!(
                "This shipment was updated elsewhere and is now {}.",
                self.server_status
            ),
            Divergence::Regressed => format!(
                "The server still reports this shipment as {}; the local view was refreshed.",
                self.server_status
            ),
        }
    }
}

/// Result of adopting a refetched record.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub record: ShipmentRecord,
    pub stale: Option<StaleNotice>,
}

/// Adopt `server` wholesale and describe any divergence from `local`.
pub fn reconcile_refetch(local: &ShipmentRecord, server: ShipmentRecord) -> Reconciliation {
    let stale = detect_divergence(local, &server);
    Reconciliation {
        record: server,
        stale,
    }
}

fn progress_flags(record: &ShipmentRecord) -> [bool; 4] {
    [
        record.pickup_requested,
        record.pickup_confirmed,
        record.delivery_requested,
        record.delivery_confirmed,
    ]
}

fn detect_divergence(local: &ShipmentRecord, server: &ShipmentRecord) -> Option<StaleNotice> {
    let local_flags = progress_flags(local);
    let server_flags = progress_flags(server);

    if local.status == server.status && local_flags == server_flags {
        return None;
    }

    let divergence = if server.status == ShipmentStatus::Cancelled {
        Divergence::CancelledRemotely
    } else {
        let rank_behind = match (local.status.rank(), server.status.rank()) {
            (Some(l), Some(s)) => s < l,
            // local thinks cancelled, server does not
            (None, Some(_)) => true,
            _ => false,
        };
        let flag_lost = local_flags
            .iter()
            .zip(server_flags.iter())
            .any(|(l, s)| *l && !*s);
        if rank_behind || flag_lost {
            Divergence::Regressed
        } else {
            Divergence::Advanced
        }
    };

    Some(StaleNotice {
        divergence,
        local_status: local.status,
        server_status: server.status,
        cancelled_by: server.cancelled_by,
    })
}
