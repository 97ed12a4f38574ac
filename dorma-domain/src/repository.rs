use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::booking::{Booking, BookingStatus, PaymentStatus};
use crate::error::StoreError;
use crate::unit::Unit;

/// Outcome of a conditional status update. `NotApplied` carries the row
/// as it currently stands so the caller can decide whether the miss is a
/// benign race (expire vs. confirm) or a real error.
#[derive(Debug)]
pub enum Transition {
    Applied(Booking),
    NotApplied(Booking),
}

/// Repository trait for booking rows. `transition_booking` is the single
/// atomic check-then-act primitive in the system: per booking, exactly one
/// of two racing conditional transitions observes `Applied`.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Persist a new booking row. Fails with `Conflict` when the tenant
    /// already has an active booking on the same unit; the store enforces
    /// this even when two requests slip past the pre-insert lookup
    /// together.
    async fn create_booking(&self, booking: &Booking) -> Result<(), StoreError>;

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError>;

    /// The tenant's existing ON_HOLD/CONFIRMED booking on a unit, if any.
    /// Backs request idempotence (double-click, double-tab).
    async fn find_active_for_tenant(
        &self,
        tenant_id: &str,
        unit_id: Uuid,
    ) -> Result<Option<Booking>, StoreError>;

    /// Number of ON_HOLD/CONFIRMED bookings on a unit. The ledger seeds
    /// its occupancy counters from this on recovery.
    async fn count_active_for_unit(&self, unit_id: Uuid) -> Result<i64, StoreError>;

    /// ON_HOLD bookings whose deadline is at or before the cutoff.
    async fn list_holds_expiring_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Booking>, StoreError>;

    /// Bookings flagged DISPUTED or REFUND_REQUIRED, for the manual
    /// review queue.
    async fn list_flagged(&self) -> Result<Vec<Booking>, StoreError>;

    /// Atomically set `status = to` (and the hold deadline) if the current
    /// status is one of `expected`; otherwise leave the row untouched.
    async fn transition_booking(
        &self,
        id: Uuid,
        expected: &[BookingStatus],
        to: BookingStatus,
        hold_expires_at: Option<DateTime<Utc>>,
    ) -> Result<Transition, StoreError>;

    async fn set_payment_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
    ) -> Result<(), StoreError>;

    async fn set_payment_reference(
        &self,
        id: Uuid,
        reference: &str,
    ) -> Result<(), StoreError>;
}

/// Repository trait for unit metadata. Occupancy is deliberately absent:
/// the ledger derives it from active bookings instead of trusting a
/// stored counter.
#[async_trait]
pub trait UnitStore: Send + Sync {
    async fn upsert_unit(&self, unit: &Unit) -> Result<(), StoreError>;

    async fn get_unit(&self, id: Uuid) -> Result<Option<Unit>, StoreError>;

    async fn list_units(&self) -> Result<Vec<Unit>, StoreError>;
}
