// =============================================================================
// models.rs — THE SHIPMENT LEDGER, AS THE CLIENT SEES IT
// =============================================================================
//
// One accepted offer becomes one transportation record. From then on the
// record walks a two-phase handshake: the transporter declares something
// happened (pickup, delivery), the cargo owner confirms it, and the status
// moves forward. At the end both parties rate each other and go home.
//
// The backend owns all of this. These structs are the client's copy: what
// came back from the last fetch, plus whatever we optimistically patched on
// top while a request was in the air. Field names follow the backend's JSON
// (snake_case) so serde can do the talking.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque shipment identifier. The backend hands out integers, but nothing
/// here does arithmetic on them, so strings are accepted too.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShipmentId {
    Numeric(u64),
    Text(String),
}

impl fmt::Display for ShipmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShipmentId::Numeric(n) => write!(f, "{n}"),
            ShipmentId::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<u64> for ShipmentId {
    fn from(value: u64) -> Self {
        ShipmentId::Numeric(value)
    }
}

impl FromStr for ShipmentId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Ok(match trimmed.parse::<u64>() {
            Ok(n) => ShipmentId::Numeric(n),
            Err(_) => ShipmentId::Text(trimmed.to_string()),
        })
    }
}

/// Authoritative status as reported by the backend.
///
/// The happy path only ever moves forward:
/// `awaiting_pickup -> in_transit -> delivered -> completed -> rated`.
/// `cancelled` can be reached from anything before `completed` and never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    AwaitingPickup,
    InTransit,
    /// The backend's status label is ambiguous here. Treated as a sub-state
    /// of `InTransit` once delivery has been requested.
    Delivered,
    Completed,
    Rated,
    Cancelled,
}

impl ShipmentStatus {
    /// Position along the happy path. Cancelled sits outside of it.
    pub fn rank(self) -> Option<u8> {
        match self {
            ShipmentStatus::AwaitingPickup => Some(0),
            ShipmentStatus::InTransit => Some(1),
            ShipmentStatus::Delivered => Some(2),
            ShipmentStatus::Completed => Some(3),
            ShipmentStatus::Rated => Some(4),
            ShipmentStatus::Cancelled => None,
        }
    }

    /// `InTransit` or its `Delivered` sub-state.
    pub fn is_in_transit_phase(self) -> bool {
        matches!(self, ShipmentStatus::InTransit | ShipmentStatus::Delivered)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ShipmentStatus::Cancelled | ShipmentStatus::Rated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ShipmentStatus::AwaitingPickup => "awaiting_pickup",
            ShipmentStatus::InTransit => "in_transit",
            ShipmentStatus::Delivered => "delivered",
            ShipmentStatus::Completed => "completed",
            ShipmentStatus::Rated => "rated",
            ShipmentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who pulled the plug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    CargoOwner,
    Transporter,
    Admin,
}

impl fmt::Display for CancelledBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelledBy::CargoOwner => write!(f, "cargo owner"),
            CancelledBy::Transporter => write!(f, "transporter"),
            CancelledBy::Admin => write!(f, "admin"),
        }
    }
}

/// The two parties a session can act as. Replaces the pair of
/// `isCargoOwner` / `isTransporter` booleans with one tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    CargoOwner,
    Transporter,
}

impl Role {
    /// The `from_cargo_owner` value of a rating written by this role.
    pub fn rating_direction(self) -> bool {
        matches!(self, Role::CargoOwner)
    }

    pub fn as_cancelled_by(self) -> CancelledBy {
        match self {
            Role::CargoOwner => CancelledBy::CargoOwner,
            Role::Transporter => CancelledBy::Transporter,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::CargoOwner => "cargo_owner",
            Role::Transporter => "transporter",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cargo_owner" | "cargoowner" | "owner" => Ok(Role::CargoOwner),
            "transporter" | "carrier" => Ok(Role::Transporter),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Everything a caller can be offered for a shipment.
///
/// `ViewOnly` is never produced by the action table; an empty set already
/// means "look, don't touch". It exists so callers can name the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    RequestPickup,
    ConfirmPickup,
    RequestDelivery,
    ConfirmDelivery,
    Cancel,
    RateCounterparty,
    ViewOnly,
}

impl Action {
    /// Actions that go through `apply_transition`.
    pub fn is_transition(self) -> bool {
        matches!(
            self,
            Action::RequestPickup
                | Action::ConfirmPickup
                | Action::RequestDelivery
                | Action::ConfirmDelivery
                | Action::Cancel
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::RequestPickup => "request_pickup",
            Action::ConfirmPickup => "confirm_pickup",
            Action::RequestDelivery => "request_delivery",
            Action::ConfirmDelivery => "confirm_delivery",
            Action::Cancel => "cancel",
            Action::RateCounterparty => "rate",
            Action::ViewOnly => "view_only",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "request_pickup" => Ok(Action::RequestPickup),
            "confirm_pickup" => Ok(Action::ConfirmPickup),
            "request_delivery" => Ok(Action::RequestDelivery),
            "confirm_delivery" => Ok(Action::ConfirmDelivery),
            "cancel" => Ok(Action::Cancel),
            "rate" | "rate_counterparty" => Ok(Action::RateCounterparty),
            "view_only" => Ok(Action::ViewOnly),
            other => Err(format!("unknown action '{other}'")),
        }
    }
}

/// Extra data a transition may carry. Only cancel uses it today.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionPayload {
    pub reason: Option<String>,
}

impl TransitionPayload {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn cancel(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
        }
    }
}

/// A transition in the exact shape the backend client sends it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionRequest {
    RequestPickup,
    ConfirmPickup,
    RequestDelivery,
    ConfirmDelivery,
    Cancel { reason: String },
}

impl TransitionRequest {
    /// `None` for non-transition actions and for cancel without a reason.
    pub fn from_action(action: Action, payload: &TransitionPayload) -> Option<Self> {
        match action {
            Action::RequestPickup => Some(TransitionRequest::RequestPickup),
            Action::ConfirmPickup => Some(TransitionRequest::ConfirmPickup),
            Action::RequestDelivery => Some(TransitionRequest::RequestDelivery),
            Action::ConfirmDelivery => Some(TransitionRequest::ConfirmDelivery),
            Action::Cancel => payload
                .reason
                .as_ref()
                .map(|reason| TransitionRequest::Cancel {
                    reason: reason.trim().to_string(),
                }),
            Action::RateCounterparty | Action::ViewOnly => None,
        }
    }

    pub fn action(&self) -> Action {
        match self {
            TransitionRequest::RequestPickup => Action::RequestPickup,
            TransitionRequest::ConfirmPickup => Action::ConfirmPickup,
            TransitionRequest::RequestDelivery => Action::RequestDelivery,
            TransitionRequest::ConfirmDelivery => Action::ConfirmDelivery,
            TransitionRequest::Cancel { .. } => Action::Cancel,
        }
    }
}

/// One party's verdict on the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingEntry {
    /// `true`: the cargo owner rated the transporter. `false`: the reverse.
    pub from_cargo_owner: bool,
    /// 1..=5
    pub rating: u8,
    #[serde(default)]
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The client-visible state of one transportation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentRecord {
    pub id: ShipmentId,
    pub status: ShipmentStatus,

    #[serde(default)]
    pub pickup_requested: bool,
    #[serde(default)]
    pub pickup_confirmed: bool,
    #[serde(default)]
    pub delivery_requested: bool,
    #[serde(default)]
    pub delivery_confirmed: bool,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pickup_requested_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pickup_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivery_requested_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivery_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub cancellation_reason: Option<String>,
    #[serde(default)]
    pub cancelled_by: Option<CancelledBy>,

    #[serde(default)]
    pub ratings: Vec<RatingEntry>,

    /// Denormalized snapshots from the backend. Carried, never interpreted.
    #[serde(default)]
    pub offer: Option<serde_json::Value>,
    #[serde(default)]
    pub cargo_post: Option<serde_json::Value>,
}

impl ShipmentRecord {
    /// A fresh record as the backend creates it when an offer is accepted.
    pub fn new(id: impl Into<ShipmentId>) -> Self {
        Self {
            id: id.into(),
            status: ShipmentStatus::AwaitingPickup,
            pickup_requested: false,
            pickup_confirmed: false,
            delivery_requested: false,
            delivery_confirmed: false,
            created_at: None,
            pickup_requested_at: None,
            pickup_confirmed_at: None,
            delivery_requested_at: None,
            delivery_confirmed_at: None,
            completed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            cancelled_by: None,
            ratings: Vec::new(),
            offer: None,
            cargo_post: None,
        }
    }

    /// The rating written by `role`, if any.
    pub fn rating_from(&self, role: Role) -> Option<&RatingEntry> {
        let direction = role.rating_direction();
        self.ratings.iter().find(|r| r.from_cargo_owner == direction)
    }

    pub fn has_rating_from(&self, role: Role) -> bool {
        self.rating_from(role).is_some()
    }

    /// Both directions present. Display only; gates nothing.
    pub fn is_fully_rated(&self) -> bool {
        self.has_rating_from(Role::CargoOwner) && self.has_rating_from(Role::Transporter)
    }
}

/// A partial record as returned by transition endpoints.
///
/// Every field is optional. Nullable record fields use a double `Option` so
/// "absent" (keep the local value) and an explicit `null` (server cleared it)
/// stay distinguishable during the merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShipmentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ShipmentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ShipmentStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup_requested: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup_confirmed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_requested: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_confirmed: Option<bool>,

    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub pickup_requested_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub pickup_confirmed_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub delivery_requested_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub delivery_confirmed_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<Option<DateTime<Utc>>>,

    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub cancelled_by: Option<Option<CancelledBy>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratings: Option<Vec<RatingEntry>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cargo_post: Option<serde_json::Value>,

    /// Human-readable message from the backend. Not part of the record.
    #[serde(default, alias = "message", skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ShipmentPatch {
    /// True when the patch carries no record fields (a bare `detail` counts as empty).
    pub fn is_empty(&self) -> bool {
        let mut fields_only = self.clone();
        fields_only.detail = None;
        fields_only == ShipmentPatch::default()
    }
}

/// Keeps an explicit `null` as `Some(None)` instead of collapsing it to `None`.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// What the backend sends back after a rating POST.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingReceipt {
    #[serde(default)]
    pub rating: Option<RatingEntry>,
    #[serde(default)]
    pub both_rated: bool,
    #[serde(default)]
    pub detail: Option<String>,
}
