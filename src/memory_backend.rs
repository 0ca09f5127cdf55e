// =============================================================================
// memory_backend.rs — A BACKEND THAT FITS IN A HASHMAP
// =============================================================================
//
// `ShipmentLedger` holds shipment records behind one lock and enforces the
// same transition rules the marketplace backend does:
//
//   request_pickup    transporter, awaiting_pickup
//   confirm_pickup    cargo owner, pickup requested, awaiting_pickup -> in_transit
//   request_delivery  transporter, in_transit
//   confirm_delivery  cargo owner, delivery requested, in_transit -> completed
//   cancel            either party, awaiting_pickup or in_transit, reason required
//   rate              either party, completed, once per direction, 1..=5
//
// Wrong role is 403, wrong state is 400, unknown id is 404. Responses have
// the backend's shapes too: most transitions answer with only a `detail`
// message, confirm_delivery echoes status and flags.
//
// Each party gets its own `InMemoryTransportationApi` handle on the shared
// ledger, so a cargo owner and a transporter can race each other against one
// shipment. The ledger can also be told to fail (outage) or to serve refetches
// without ratings (a lagging read replica).
// =============================================================================

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::api::TransportationApi;
use crate::error::ApiError;
use crate::models::{
    RatingEntry, RatingReceipt, Role, ShipmentId, ShipmentPatch, ShipmentRecord, ShipmentStatus,
};

#[derive(Default)]
struct LedgerState {
    shipments: HashMap<ShipmentId, ShipmentRecord>,
    outage: bool,
    hide_ratings_on_read: bool,
}

/// Shared in-memory store of shipment records.
#[derive(Clone, Default)]
pub struct ShipmentLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl ShipmentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: ShipmentRecord) {
        self.state.write().shipments.insert(record.id.clone(), record);
    }

    /// The authoritative copy, bypassing outage and lag simulation.
    pub fn snapshot(&self, id: &ShipmentId) -> Option<ShipmentRecord> {
        self.state.read().shipments.get(id).cloned()
    }

    /// Every call answers 503 while set.
    pub fn set_outage(&self, down: bool) {
        self.state.write().outage = down;
    }

    /// `get_details` drops the ratings list while set.
    pub fn set_hide_ratings_on_read(&self, hide: bool) {
        self.state.write().hide_ratings_on_read = hide;
    }

    /// A client handle acting as `role`.
    pub fn as_party(&self, role: Role) -> InMemoryTransportationApi {
        InMemoryTransportationApi {
            ledger: self.clone(),
            acting_as: role,
        }
    }

    /// Run `op` against the record under the write lock.
    fn with_record<T>(
        &self,
        id: &ShipmentId,
        op: impl FnOnce(&mut ShipmentRecord) -> Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        let mut state = self.state.write();
        if state.outage {
            return Err(unavailable());
        }
        let record = state.shipments.get_mut(id).ok_or_else(not_found)?;
        op(record)
    }
}

/// `TransportationApi` over a `ShipmentLedger`, acting as one party.
#[derive(Clone)]
pub struct InMemoryTransportationApi {
    ledger: ShipmentLedger,
    acting_as: Role,
}

impl InMemoryTransportationApi {
    pub fn role(&self) -> Role {
        self.acting_as
    }

    pub fn ledger(&self) -> &ShipmentLedger {
        &self.ledger
    }

    fn require(&self, role: Role, message: &str) -> Result<(), ApiError> {
        if self.acting_as == role {
            Ok(())
        } else {
            Err(forbidden(message))
        }
    }
}

fn unavailable() -> ApiError {
    ApiError::Server {
        status: 503,
        message: "Service temporarily unavailable.".to_string(),
    }
}

fn not_found() -> ApiError {
    ApiError::Rejected {
        status: 404,
        message: "Transportation not found.".to_string(),
    }
}

fn forbidden(message: &str) -> ApiError {
    ApiError::Rejected {
        status: 403,
        message: message.to_string(),
    }
}

fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError::Rejected {
        status: 400,
        message: message.into(),
    }
}

fn wrong_state(record: &ShipmentRecord, what: &str) -> ApiError {
    bad_request(format!(
        "Transportation is currently '{}'. {what} is not possible.",
        record.status
    ))
}

fn detail(message: &str) -> ShipmentPatch {
    ShipmentPatch {
        detail: Some(message.to_string()),
        ..ShipmentPatch::default()
    }
}

#[async_trait]
impl TransportationApi for InMemoryTransportationApi {
    async fn request_pickup(&self, id: &ShipmentId) -> Result<ShipmentPatch, ApiError> {
        self.ledger.with_record(id, |record| {
            self.require(Role::Transporter, "Only the assigned transporter can do this.")?;
            if record.status != ShipmentStatus::AwaitingPickup {
                return Err(wrong_state(record, "Requesting pickup"));
            }
            record.pickup_requested = true;
            record.pickup_requested_at = Some(Utc::now());
            debug!(shipment_id = %id, "Ledger: pickup requested");
            Ok(detail("Pickup request sent. Waiting for the cargo owner to confirm."))
        })
    }

    async fn confirm_pickup(&self, id: &ShipmentId) -> Result<ShipmentPatch, ApiError> {
        self.ledger.with_record(id, |record| {
            self.require(Role::CargoOwner, "Only the cargo owner can do this.")?;
            if !record.pickup_requested {
                return Err(bad_request("The transporter has not requested pickup yet."));
            }
            if record.status != ShipmentStatus::AwaitingPickup {
                return Err(wrong_state(record, "Confirming pickup"));
            }
            record.pickup_confirmed = true;
            record.pickup_confirmed_at = Some(Utc::now());
            record.status = ShipmentStatus::InTransit;
            debug!(shipment_id = %id, "Ledger: pickup confirmed");
            Ok(detail("Pickup confirmed. Transportation has started."))
        })
    }

    async fn request_delivery(&self, id: &ShipmentId) -> Result<ShipmentPatch, ApiError> {
        self.ledger.with_record(id, |record| {
            self.require(Role::Transporter, "Only the assigned transporter can do this.")?;
            if record.status != ShipmentStatus::InTransit {
                return Err(wrong_state(record, "Reporting delivery"));
            }
            record.delivery_requested = true;
            record.delivery_requested_at = Some(Utc::now());
            debug!(shipment_id = %id, "Ledger: delivery requested");
            Ok(detail("Delivery reported. Waiting for the cargo owner to confirm."))
        })
    }

    async fn confirm_delivery(&self, id: &ShipmentId) -> Result<ShipmentPatch, ApiError> {
        self.ledger.with_record(id, |record| {
            self.require(Role::CargoOwner, "Only the cargo owner can do this.")?;
            if !record.delivery_requested {
                return Err(bad_request("The transporter has not reported delivery yet."));
            }
            if record.status != ShipmentStatus::InTransit {
                return Err(wrong_state(record, "Confirming delivery"));
            }
            let now = Utc::now();
            record.delivery_confirmed = true;
            record.delivery_confirmed_at = Some(now);
            record.status = ShipmentStatus::Completed;
            record.completed_at = Some(now);
            debug!(shipment_id = %id, "Ledger: delivery confirmed");
            Ok(ShipmentPatch {
                status: Some(record.status),
                delivery_confirmed: Some(true),
                delivery_confirmed_at: Some(Some(now)),
                detail: Some("Delivery confirmed.".to_string()),
                ..ShipmentPatch::default()
            })
        })
    }

    async fn cancel(&self, id: &ShipmentId, reason: &str) -> Result<ShipmentPatch, ApiError> {
        self.ledger.with_record(id, |record| {
            if !matches!(
                record.status,
                ShipmentStatus::AwaitingPickup | ShipmentStatus::InTransit
            ) {
                return Err(wrong_state(record, "Cancelling"));
            }
            let reason = reason.trim();
            if reason.is_empty() {
                return Err(bad_request("A cancellation reason is required."));
            }
            record.status = ShipmentStatus::Cancelled;
            record.cancelled_at = Some(Utc::now());
            record.cancelled_by = Some(self.acting_as.as_cancelled_by());
            record.cancellation_reason = Some(reason.to_string());
            debug!(shipment_id = %id, by = %self.acting_as, "Ledger: cancelled");
            Ok(detail("Transportation cancelled."))
        })
    }

    async fn get_details(&self, id: &ShipmentId) -> Result<ShipmentRecord, ApiError> {
        let state = self.ledger.state.read();
        if state.outage {
            return Err(unavailable());
        }
        let mut record = state.shipments.get(id).cloned().ok_or_else(not_found)?;
        if state.hide_ratings_on_read {
            record.ratings.clear();
        }
        Ok(record)
    }

    async fn rate(
        &self,
        id: &ShipmentId,
        rating: u8,
        comment: Option<&str>,
    ) -> Result<RatingReceipt, ApiError> {
        self.ledger.with_record(id, |record| {
            if record.status != ShipmentStatus::Completed {
                return Err(bad_request("Only completed transportations can be rated."));
            }
            if record.has_rating_from(self.acting_as) {
                return Err(bad_request("You have already rated this transportation."));
            }
            if !(1..=5).contains(&rating) {
                return Err(bad_request("A rating between 1 and 5 is required."));
            }
            let entry = RatingEntry {
                from_cargo_owner: self.acting_as.rating_direction(),
                rating,
                comment: Some(comment.unwrap_or_default().to_string()),
                created_at: Utc::now(),
            };
            record.ratings.push(entry.clone());
            debug!(shipment_id = %id, by = %self.acting_as, rating, "Ledger: rated");
            Ok(RatingReceipt {
                rating: Some(entry),
                both_rated: record.is_fully_rated(),
                detail: Some("Rating saved.".to_string()),
            })
        })
    }
}
