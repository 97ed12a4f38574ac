use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dorma_domain::repository::{BookingStore, Transition, UnitStore};
use dorma_domain::{Booking, BookingError, BookingStatus, Unit};
use dorma_ledger::{AvailabilityLedger, LedgerError, ReservationToken};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::feed::ChangeFeed;

/// Owns the temporal side of a reservation: placing a time-boxed hold,
/// expiring it, and consuming or releasing it when payment settles.
///
/// Expiry is sweep-based: the deadline lives in the booking row, and
/// `run_sweep_once` expires everything due. The worst-case overshoot past
/// a deadline is one sweep interval, and because no timer state exists
/// outside the store, holds survive process restarts for free.
pub struct HoldManager {
    ledger: Arc<AvailabilityLedger>,
    bookings: Arc<dyn BookingStore>,
    units: Arc<dyn UnitStore>,
    feed: ChangeFeed,
}

impl HoldManager {
    pub fn new(
        ledger: Arc<AvailabilityLedger>,
        bookings: Arc<dyn BookingStore>,
        units: Arc<dyn UnitStore>,
        feed: ChangeFeed,
    ) -> Self {
        Self {
            ledger,
            bookings,
            units,
            feed,
        }
    }

    /// Claim a slot and compute the hold deadline. A unit stored after
    /// startup gets its ledger entry seeded here on first contact. On
    /// `Conflict` the caller gets `RoomUnavailable` and nothing has been
    /// mutated.
    pub async fn place_hold(
        &self,
        unit: &Unit,
        ttl: Duration,
    ) -> Result<(ReservationToken, DateTime<Utc>), BookingError> {
        if self.ledger.snapshot(unit.id).is_none() {
            self.seed_unit(unit).await?;
        }

        let token = self.ledger.try_reserve(unit.id).map_err(|e| match e {
            LedgerError::Conflict => BookingError::RoomUnavailable,
            LedgerError::UnknownUnit(_) => BookingError::NotFound,
        })?;

        let deadline = Utc::now() + ttl;
        self.publish_snapshot(unit.id);
        Ok((token, deadline))
    }

    /// Undo a hold whose booking row never made it to the store.
    pub(crate) fn abort_hold(&self, token: ReservationToken) {
        self.release_slot(token.unit_id);
    }

    /// Consume (on confirmation) or release (on cancellation) a hold.
    /// Consumption leaves the slot occupied; ownership just became
    /// durable. Idempotent: the status guard upstream already decided
    /// whether this call runs, and a double release floors at zero.
    pub fn cancel_hold(&self, booking: &Booking, release_slot: bool) {
        if release_slot {
            self.release_slot(booking.unit_id);
        } else {
            debug!(booking_id = %booking.id, "hold consumed by confirmation");
        }
    }

    /// Expire one hold if it is still ON_HOLD. The conditional transition
    /// is the atomic check-then-act that resolves the race against a
    /// payment confirmation landing in the same instant: exactly one side
    /// observes `Applied`. Returns whether this call did the expiry.
    pub async fn expire_hold(&self, booking_id: Uuid) -> Result<bool, BookingError> {
        match self
            .bookings
            .transition_booking(
                booking_id,
                &[BookingStatus::OnHold],
                BookingStatus::Expired,
                None,
            )
            .await?
        {
            Transition::Applied(booking) => {
                self.release_slot(booking.unit_id);
                self.feed.publish_booking(&booking);
                info!(%booking_id, unit_id = %booking.unit_id, "hold expired, slot released");
                Ok(true)
            }
            Transition::NotApplied(current) => {
                debug!(%booking_id, status = %current.status, "hold already settled, expiry is a no-op");
                Ok(false)
            }
        }
    }

    /// Expire every hold whose deadline is at or before `now`. Safe to
    /// call repeatedly; already-settled bookings are skipped by the
    /// status guard.
    pub async fn run_sweep_once(&self, now: DateTime<Utc>) -> Result<usize, BookingError> {
        let due = self.bookings.list_holds_expiring_before(now).await?;
        let mut expired = 0;
        for booking in due {
            if self.expire_hold(booking.id).await? {
                expired += 1;
            }
        }
        if expired > 0 {
            info!(expired, "hold sweep released slots");
        }
        Ok(expired)
    }

    /// Re-seed the ledger after a restart. Each unit's occupancy is
    /// derived by counting its live bookings; no stored counter is
    /// trusted. Due holds need no special handling: the first sweep pass
    /// picks them up from their persisted deadlines.
    pub async fn recover(&self) -> Result<usize, BookingError> {
        let units = self.units.list_units().await?;
        let count = units.len();
        for unit in units {
            let active = self.bookings.count_active_for_unit(unit.id).await?;
            let occupied = i32::try_from(active).unwrap_or(i32::MAX);
            self.ledger.register(unit.id, unit.capacity, occupied);
        }
        info!(units = count, "ledger recovered from store");
        Ok(count)
    }

    async fn seed_unit(&self, unit: &Unit) -> Result<(), BookingError> {
        let active = self.bookings.count_active_for_unit(unit.id).await?;
        let occupied = i32::try_from(active).unwrap_or(i32::MAX);
        self.ledger.register_if_absent(unit.id, unit.capacity, occupied);
        debug!(unit_id = %unit.id, occupied, "unit registered on first contact");
        Ok(())
    }

    fn release_slot(&self, unit_id: Uuid) {
        if let Err(e) = self.ledger.release(unit_id) {
            warn!(%unit_id, error = %e, "release for unit missing from ledger");
            return;
        }
        self.publish_snapshot(unit_id);
    }

    fn publish_snapshot(&self, unit_id: Uuid) {
        if let Some(snapshot) = self.ledger.snapshot(unit_id) {
            self.feed.publish_availability(snapshot);
        }
    }
}
