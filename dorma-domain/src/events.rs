use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::booking::BookingStatus;
use crate::unit::AvailabilitySnapshot;

/// Event fanned out to viewers of a unit's detail page. Best-effort,
/// at-most-once; the ledger stays the correctness boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedEvent {
    Availability(AvailabilitySnapshot),
    Booking {
        booking_id: Uuid,
        unit_id: Uuid,
        status: BookingStatus,
    },
}

impl FeedEvent {
    pub fn unit_id(&self) -> Uuid {
        match self {
            FeedEvent::Availability(snapshot) => snapshot.unit_id,
            FeedEvent::Booking { unit_id, .. } => *unit_id,
        }
    }
}
