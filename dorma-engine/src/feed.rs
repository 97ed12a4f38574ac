use dorma_domain::{AvailabilitySnapshot, Booking, FeedEvent};
use tokio::sync::broadcast;

/// Fan-out of ledger and booking changes to every client currently viewing
/// a unit. Delivery is best-effort, at-most-once: a lagging or absent
/// subscriber loses events and reconciles by re-fetching the snapshot.
#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<FeedEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.tx.subscribe()
    }

    pub fn publish_availability(&self, snapshot: AvailabilitySnapshot) {
        // Send only fails when nobody is subscribed.
        let _ = self.tx.send(FeedEvent::Availability(snapshot));
    }

    pub fn publish_booking(&self, booking: &Booking) {
        let _ = self.tx.send(FeedEvent::Booking {
            booking_id: booking.id,
            unit_id: booking.unit_id,
            status: booking.status,
        });
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(128)
    }
}
