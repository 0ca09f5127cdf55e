// =============================================================================
// actions.rs — WHICH BUTTONS LIGHT UP
// =============================================================================
//
// The action table. Given a record and who is looking at it, decide what
// that person may do next and what notice goes next to the buttons.
//
// Everything here is a pure function of its inputs. No clock reads except
// the one handed in, no caches, no I/O. The rules are evaluated top to
// bottom and the first matching rule wins:
//
//   1. cancelled                          -> nothing, cancellation notice
//   2. caller already rated               -> nothing, "already rated"
//   3. completed / delivery confirmed     -> rate the counterparty
//   4. delivery requested, not confirmed  -> owner confirms, transporter waits
//   5. in transit                         -> transporter reports delivery
//   6. awaiting pickup                    -> request / confirm pickup, cancel
// =============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

use crate::error::ControllerError;
use crate::models::{
    Action, Role, ShipmentPatch, ShipmentRecord, ShipmentStatus, TransitionPayload,
    TransitionRequest,
};

/// Ordered so logs and tests see a stable iteration order.
pub type ActionSet = BTreeSet<Action>;

/// What to show next to (or instead of) the buttons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    Cancelled { reason: Option<String> },
    AlreadyRated,
    /// Transporter reported delivery; the cargo owner should confirm.
    DeliveryReported,
    /// Transporter side of the above: waiting on the owner.
    AwaitingDeliveryConfirmation,
    /// Cargo owner while the load is moving. Tracking only.
    Tracking,
    PickupConfirmed,
    /// Transporter asked for pickup confirmation and is waiting.
    AwaitingPickupConfirmation,
    /// Nothing specific applies; show the raw status.
    Status { status: ShipmentStatus },
}

impl Notice {
    pub fn message(&self) -> String {
        match self {
            Notice::Cancelled { reason: Some(reason) } => {
                format!("This shipment has been cancelled. Reason: {reason}")
            }
            Notice::Cancelled { reason: None } => "This shipment has been cancelled.".to_string(),
            Notice::AlreadyRated => "You have already rated this shipment. Thank you!".to_string(),
            Notice::DeliveryReported => {
                "The transporter reported the delivery. Confirm once you have received the load."
                    .to_string()
            }
            Notice::AwaitingDeliveryConfirmation => {
                "Delivery reported. Waiting for the cargo owner to confirm.".to_string()
            }
            Notice::Tracking => "In transit. Waiting for delivery.".to_string(),
            Notice::PickupConfirmed => "Pickup confirmed. The shipment is under way.".to_string(),
            Notice::AwaitingPickupConfirmation => {
                "Pickup request sent. Waiting for the cargo owner to confirm.".to_string()
            }
            Notice::Status { status } => format!("Shipment status: {status}"),
        }
    }
}

/// The full answer for one (record, role) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionPlan {
    pub actions: ActionSet,
    pub notice: Option<Notice>,
}

impl ActionPlan {
    fn only(notice: Notice) -> Self {
        Self {
            actions: ActionSet::new(),
            notice: Some(notice),
        }
    }

    fn with(actions: impl IntoIterator<Item = Action>, notice: Option<Notice>) -> Self {
        Self {
            actions: actions.into_iter().collect(),
            notice,
        }
    }

    pub fn allows(&self, action: Action) -> bool {
        self.actions.contains(&action)
    }

    /// No state-changing action on offer.
    pub fn is_view_only(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Whether the record itself carries a rating written by `role`.
///
/// This is only the record's opinion. The controller layers the session
/// rating cache on top of it, see `rating_cache`.
pub fn is_already_rated(record: &ShipmentRecord, role: Role) -> bool {
    record.has_rating_from(role)
}

/// The action set for `role`, judged from the record alone.
pub fn determine_available_actions(record: &ShipmentRecord, role: Role) -> ActionSet {
    plan_actions(record, role, is_already_rated(record, role)).actions
}

/// Run the action table.
///
/// `already_rated` is passed in rather than derived so callers holding a
/// session cache can feed its verdict without this function touching it.
pub fn plan_actions(record: &ShipmentRecord, role: Role, already_rated: bool) -> ActionPlan {
    // 1. cancelled
    if record.status == ShipmentStatus::Cancelled {
        return ActionPlan::only(Notice::Cancelled {
            reason: record.cancellation_reason.clone(),
        });
    }

    // 2. the caller's own rating direction is already present
    if already_rated {
        return ActionPlan::only(Notice::AlreadyRated);
    }

    // 3. completed or delivery confirmed; rule 2 already ruled out an own rating.
    // A `rated` status means the other side has rated, not that this one has.
    if matches!(record.status, ShipmentStatus::Completed | ShipmentStatus::Rated)
        || record.delivery_confirmed
    {
        return ActionPlan::with([Action::RateCounterparty], None);
    }

    // 4. delivery requested, not yet confirmed
    if record.delivery_requested {
        return match role {
            Role::CargoOwner => {
                ActionPlan::with([Action::ConfirmDelivery], Some(Notice::DeliveryReported))
            }
            Role::Transporter => ActionPlan::only(Notice::AwaitingDeliveryConfirmation),
        };
    }

    // 5. in transit (delivered counts as a sub-state)
    if record.status.is_in_transit_phase() {
        return match role {
            Role::CargoOwner => ActionPlan::only(Notice::Tracking),
            Role::Transporter => ActionPlan::with([Action::RequestDelivery], None),
        };
    }

    // 6. awaiting pickup
    if record.status == ShipmentStatus::AwaitingPickup {
        if record.pickup_confirmed {
            return ActionPlan::only(Notice::PickupConfirmed);
        }

        let mut actions = ActionSet::new();
        let mut notice = None;
        match role {
            Role::CargoOwner if record.pickup_requested => {
                actions.insert(Action::ConfirmPickup);
            }
            Role::Transporter if !record.pickup_requested => {
                actions.insert(Action::RequestPickup);
            }
            Role::Transporter => notice = Some(Notice::AwaitingPickupConfirmation),
            Role::CargoOwner => {}
        }
        // Either party may cancel until pickup is confirmed.
        actions.insert(Action::Cancel);
        return ActionPlan { actions, notice };
    }

    ActionPlan::only(Notice::Status {
        status: record.status,
    })
}

/// Check a requested transition against the action table and its payload.
///
/// Returns the request in wire shape on success. Never touches the network.
pub fn validate_transition(
    record: &ShipmentRecord,
    role: Role,
    action: Action,
    payload: &TransitionPayload,
    already_rated: bool,
) -> Result<TransitionRequest, ControllerError> {
    if !action.is_transition() {
        return Err(ControllerError::Validation {
            action,
            reason: format!("{action} is not a status transition"),
        });
    }

    let plan = plan_actions(record, role, already_rated);
    if !plan.allows(action) {
        return Err(ControllerError::Validation {
            action,
            reason: format!(
                "{action} is not available to the {role} while the shipment is {}",
                record.status
            ),
        });
    }

    let blank_reason = payload
        .reason
        .as_deref()
        .map(|r| r.trim().is_empty())
        .unwrap_or(true);
    if action == Action::Cancel && blank_reason {
        return Err(ControllerError::Validation {
            action,
            reason: "A cancellation reason is required.".to_string(),
        });
    }

    TransitionRequest::from_action(action, payload).ok_or_else(|| ControllerError::Validation {
        action,
        reason: format!("{action} could not be built from the given payload"),
    })
}

/// The local patch applied the moment a transition is sent.
///
/// Timestamps are set once: a timestamp already present on the record is
/// left alone. The server's answer overwrites all of this on success.
pub fn optimistic_patch(
    record: &ShipmentRecord,
    role: Role,
    request: &TransitionRequest,
    now: DateTime<Utc>,
) -> ShipmentPatch {
    let stamp = |existing: Option<DateTime<Utc>>| match existing {
        Some(_) => None,
        None => Some(Some(now)),
    };

    match request {
        TransitionRequest::RequestPickup => ShipmentPatch {
            pickup_requested: Some(true),
            pickup_requested_at: stamp(record.pickup_requested_at),
            ..ShipmentPatch::default()
        },
        TransitionRequest::ConfirmPickup => ShipmentPatch {
            pickup_confirmed: Some(true),
            status: Some(ShipmentStatus::InTransit),
            pickup_confirmed_at: stamp(record.pickup_confirmed_at),
            ..ShipmentPatch::default()
        },
        TransitionRequest::RequestDelivery => ShipmentPatch {
            delivery_requested: Some(true),
            delivery_requested_at: stamp(record.delivery_requested_at),
            ..ShipmentPatch::default()
        },
        TransitionRequest::ConfirmDelivery => ShipmentPatch {
            delivery_confirmed: Some(true),
            status: Some(ShipmentStatus::Completed),
            delivery_confirmed_at: stamp(record.delivery_confirmed_at),
            ..ShipmentPatch::default()
        },
        TransitionRequest::Cancel { reason } => ShipmentPatch {
            status: Some(ShipmentStatus::Cancelled),
            cancellation_reason: Some(Some(reason.clone())),
            cancelled_by: Some(Some(role.as_cancelled_by())),
            cancelled_at: stamp(record.cancelled_at),
            ..ShipmentPatch::default()
        },
    }
}
