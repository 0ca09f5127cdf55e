// =============================================================================
// timeline.rs — WHAT HAPPENED, IN ORDER
// =============================================================================
//
// Derives the history view from a record: one entry per milestone that has
// happened, sorted by timestamp. Entries whose timestamp the backend never
// sent sink to the bottom, keeping their relative order. Plus the stepper
// index for the current status.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{ShipmentRecord, ShipmentStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineStage {
    Created,
    PickupRequested,
    InTransit,
    Delivered,
    Completed,
    Rated,
    Cancelled,
}

impl TimelineStage {
    pub fn label(self) -> &'static str {
        match self {
            TimelineStage::Created => "Shipment created",
            TimelineStage::PickupRequested => "Pickup requested",
            TimelineStage::InTransit => "In transit",
            TimelineStage::Delivered => "Delivered",
            TimelineStage::Completed => "Completed",
            TimelineStage::Rated => "Rated",
            TimelineStage::Cancelled => "Cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineEntry {
    pub stage: TimelineStage,
    pub at: Option<DateTime<Utc>>,
    pub details: String,
}

impl TimelineEntry {
    fn new(stage: TimelineStage, at: Option<DateTime<Utc>>, details: impl Into<String>) -> Self {
        Self {
            stage,
            at,
            details: details.into(),
        }
    }
}

pub fn build_timeline(record: &ShipmentRecord) -> Vec<TimelineEntry> {
    let mut entries = vec![TimelineEntry::new(
        TimelineStage::Created,
        record.created_at,
        format!("Shipment #{} created", record.id),
    )];

    if record.pickup_requested {
        entries.push(TimelineEntry::new(
            TimelineStage::PickupRequested,
            record.pickup_requested_at,
            "The transporter requested pickup",
        ));
    }
    if record.pickup_confirmed {
        entries.push(TimelineEntry::new(
            TimelineStage::InTransit,
            record.pickup_confirmed_at,
            "Load picked up, transport under way",
        ));
    }
    if record.delivery_requested {
        entries.push(TimelineEntry::new(
            TimelineStage::Delivered,
            record.delivery_requested_at,
            "The transporter reported delivery",
        ));
    }
    if record.delivery_confirmed {
        entries.push(TimelineEntry::new(
            TimelineStage::Completed,
            record.delivery_confirmed_at.or(record.completed_at),
            "Delivery confirmed, shipment completed",
        ));
    }

    for rating in &record.ratings {
        let who = if rating.from_cargo_owner {
            "The cargo owner rated the transporter"
        } else {
            "The transporter rated the cargo owner"
        };
        entries.push(TimelineEntry::new(
            TimelineStage::Rated,
            Some(rating.created_at),
            format!("{who} ({}/5)", rating.rating),
        ));
    }

    if record.status == ShipmentStatus::Cancelled {
        let mut details = match record.cancelled_by {
            Some(by) => format!("Cancelled by the {by}"),
            None => "Cancelled".to_string(),
        };
        if let Some(reason) = &record.cancellation_reason {
            details.push_str(&format!(": {reason}"));
        }
        entries.push(TimelineEntry::new(
            TimelineStage::Cancelled,
            record.cancelled_at,
            details,
        ));
    }

    // stable: undated entries keep insertion order at the end
    entries.sort_by_key(|e| (e.at.is_none(), e.at));
    entries
}

/// Stepper position for `status`. `None` for cancelled, which is drawn off
/// the main line.
pub fn active_step(status: ShipmentStatus) -> Option<usize> {
    status.rank().map(usize::from)
}
