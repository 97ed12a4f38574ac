use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dorma_domain::repository::{BookingStore, Transition, UnitStore};
use dorma_domain::{Booking, BookingStatus, PaymentStatus, StoreError, Unit};
use uuid::Uuid;

/// HashMap-backed store for tests and local runs. The booking map's write
/// lock makes `transition_booking` a single atomic check-then-act, which
/// is all the engine's conditional-transition discipline needs.
#[derive(Default)]
pub struct InMemoryStore {
    bookings: RwLock<HashMap<Uuid, Booking>>,
    units: RwLock<HashMap<Uuid, Unit>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingStore for InMemoryStore {
    async fn create_booking(&self, booking: &Booking) -> Result<(), StoreError> {
        let mut bookings = self.bookings.write().unwrap();
        if bookings.contains_key(&booking.id) {
            return Err(StoreError::Conflict);
        }
        // Mirrors the partial unique index: one live booking per tenant
        // and unit, enforced under the write lock.
        if booking.status.is_active()
            && bookings.values().any(|b| {
                b.tenant_id == booking.tenant_id
                    && b.unit_id == booking.unit_id
                    && b.status.is_active()
            })
        {
            return Err(StoreError::Conflict);
        }
        bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        Ok(self.bookings.read().unwrap().get(&id).cloned())
    }

    async fn find_active_for_tenant(
        &self,
        tenant_id: &str,
        unit_id: Uuid,
    ) -> Result<Option<Booking>, StoreError> {
        Ok(self
            .bookings
            .read()
            .unwrap()
            .values()
            .find(|b| b.tenant_id == tenant_id && b.unit_id == unit_id && b.status.is_active())
            .cloned())
    }

    async fn count_active_for_unit(&self, unit_id: Uuid) -> Result<i64, StoreError> {
        Ok(self
            .bookings
            .read()
            .unwrap()
            .values()
            .filter(|b| b.unit_id == unit_id && b.status.is_active())
            .count() as i64)
    }

    async fn list_holds_expiring_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Booking>, StoreError> {
        Ok(self
            .bookings
            .read()
            .unwrap()
            .values()
            .filter(|b| {
                b.status == BookingStatus::OnHold
                    && b.hold_expires_at.is_some_and(|at| at <= cutoff)
            })
            .cloned()
            .collect())
    }

    async fn list_flagged(&self) -> Result<Vec<Booking>, StoreError> {
        Ok(self
            .bookings
            .read()
            .unwrap()
            .values()
            .filter(|b| b.payment_status.is_flagged())
            .cloned()
            .collect())
    }

    async fn transition_booking(
        &self,
        id: Uuid,
        expected: &[BookingStatus],
        to: BookingStatus,
        hold_expires_at: Option<DateTime<Utc>>,
    ) -> Result<Transition, StoreError> {
        let mut bookings = self.bookings.write().unwrap();
        let booking = bookings.get_mut(&id).ok_or(StoreError::NotFound)?;

        if expected.contains(&booking.status) {
            booking.status = to;
            booking.hold_expires_at = hold_expires_at;
            Ok(Transition::Applied(booking.clone()))
        } else {
            Ok(Transition::NotApplied(booking.clone()))
        }
    }

    async fn set_payment_status(&self, id: Uuid, status: PaymentStatus) -> Result<(), StoreError> {
        let mut bookings = self.bookings.write().unwrap();
        let booking = bookings.get_mut(&id).ok_or(StoreError::NotFound)?;
        booking.payment_status = status;
        Ok(())
    }

    async fn set_payment_reference(&self, id: Uuid, reference: &str) -> Result<(), StoreError> {
        let mut bookings = self.bookings.write().unwrap();
        let booking = bookings.get_mut(&id).ok_or(StoreError::NotFound)?;
        booking.payment_reference = Some(reference.to_string());
        Ok(())
    }
}

#[async_trait]
impl UnitStore for InMemoryStore {
    async fn upsert_unit(&self, unit: &Unit) -> Result<(), StoreError> {
        self.units.write().unwrap().insert(unit.id, unit.clone());
        Ok(())
    }

    async fn get_unit(&self, id: Uuid) -> Result<Option<Unit>, StoreError> {
        Ok(self.units.read().unwrap().get(&id).cloned())
    }

    async fn list_units(&self) -> Result<Vec<Unit>, StoreError> {
        Ok(self.units.read().unwrap().values().cloned().collect())
    }
}
