// =============================================================================
// error.rs — EVERYTHING THAT CAN SAY "NO"
// =============================================================================
//
// Two layers. `ApiError` is what the backend client reports: the server said
// no, the server fell over, or the network ate the request. `ControllerError`
// is what the shipment controller hands to the view, already sorted into the
// buckets a user cares about. None of them are fatal; the page stays usable.
// =============================================================================

use thiserror::Error;

use crate::models::{Action, ShipmentId};

/// Failures of the transportation backend client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// 4xx. The server looked at the request and refused it.
    #[error("backend rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// 5xx. The server tried and failed.
    #[error("backend failed ({status}): {message}")]
    Server { status: u16, message: String },

    /// No response at all: DNS, TLS, timeout, connection reset.
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("could not decode backend response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl ApiError {
    /// HTTP status, when there was a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Rejected { status, .. } | ApiError::Server { status, .. } => Some(*status),
            ApiError::Transport(err) => err.status().map(|s| s.as_u16()),
            ApiError::Decode(_) | ApiError::Config(_) => None,
        }
    }
}

/// Failures surfaced by the shipment controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The action is not in the currently available set. Caught before any
    /// request leaves the client.
    #[error("{action} is not available: {reason}")]
    Validation { action: Action, reason: String },

    /// Another request for the same shipment has not settled yet.
    #[error("another action is already in flight for shipment {shipment_id}")]
    ActionInFlight { shipment_id: ShipmentId },

    /// Server 4xx on a transition. Local state was rolled back.
    #[error("transition rejected ({status}): {message}")]
    TransitionRejected { status: u16, message: String },

    /// No usable response (transport failure or 5xx). Local state was rolled
    /// back. Retrying is left to the user.
    #[error("network error: {message}")]
    Network { status: Option<u16>, message: String },
}

impl ControllerError {
    /// Short text fit for a snackbar.
    pub fn user_message(&self) -> String {
        match self {
            ControllerError::Validation { reason, .. } => reason.clone(),
            ControllerError::ActionInFlight { .. } => {
                "Please wait for the previous action to finish.".to_string()
            }
            ControllerError::TransitionRejected { message, .. } => message.clone(),
            ControllerError::Network { .. } => {
                "Could not reach the server. Please try again.".to_string()
            }
        }
    }
}

impl From<ApiError> for ControllerError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Rejected { status, message } => {
                ControllerError::TransitionRejected { status, message }
            }
            ApiError::Server { status, message } => ControllerError::Network {
                status: Some(status),
                message,
            },
            other => ControllerError::Network {
                status: other.status(),
                message: other.to_string(),
            },
        }
    }
}
