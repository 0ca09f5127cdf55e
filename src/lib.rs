// =============================================================================
// SHIPMENT STATUS ENGINE
// =============================================================================
//
// The client side of a freight handshake. A transporter says "picked up",
// the cargo owner says "confirmed", the status moves. Same again for
// delivery, then both sides rate each other.
//
// The backend is always right. This crate decides which buttons to offer,
// patches the local copy the moment one is pressed, and puts everything
// back the way it was if the backend disagrees.
// =============================================================================

pub mod actions;
pub mod api;
pub mod auth;
pub mod circuit_breaker;
pub mod config;
pub mod controller;
pub mod error;
pub mod in_flight;
pub mod memory_backend;
pub mod metrics;
pub mod models;
pub mod poller;
pub mod rating_cache;
pub mod reconcile;
pub mod timeline;

pub use actions::{determine_available_actions, plan_actions, ActionPlan, ActionSet, Notice};
pub use api::{HttpTransportationApi, TransportationApi};
pub use controller::ShipmentController;
pub use error::{ApiError, ControllerError};
pub use models::{Action, Role, ShipmentId, ShipmentRecord, ShipmentStatus, TransitionPayload};
