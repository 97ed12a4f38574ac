use std::sync::Arc;

use dorma_domain::payment::PaymentProvider;
use dorma_domain::repository::{BookingStore, Transition, UnitStore};
use dorma_domain::{
    Booking, BookingError, BookingStatus, BookingTerms, Claims, Role, StoreError,
};
use tokio::time::{sleep, Duration as TokioDuration};
use tracing::{info, warn};
use uuid::Uuid;

use crate::feed::ChangeFeed;
use crate::holds::HoldManager;
use crate::BookingRules;

const STORE_RETRY_ATTEMPTS: u32 = 3;

/// A freshly created (or idempotently re-returned) booking together with
/// the reference the tenant needs for the external payment step.
#[derive(Debug)]
pub struct BookingReceipt {
    pub booking: Booking,
    pub payment_reference: Option<String>,
}

/// External-facing entry point: validates a booking request, acquires a
/// hold, persists the row, and hands out the payment reference.
pub struct BookingOrchestrator {
    bookings: Arc<dyn BookingStore>,
    units: Arc<dyn UnitStore>,
    holds: Arc<HoldManager>,
    payments: Arc<dyn PaymentProvider>,
    feed: ChangeFeed,
    rules: BookingRules,
}

impl BookingOrchestrator {
    pub fn new(
        bookings: Arc<dyn BookingStore>,
        units: Arc<dyn UnitStore>,
        holds: Arc<HoldManager>,
        payments: Arc<dyn PaymentProvider>,
        feed: ChangeFeed,
        rules: BookingRules,
    ) -> Self {
        Self {
            bookings,
            units,
            holds,
            payments,
            feed,
            rules,
        }
    }

    /// Validate and sequence booking creation.
    ///
    /// Two simultaneous requests for the last free slot yield exactly one
    /// success and one `RoomUnavailable`; the ledger's per-unit guard
    /// inside `place_hold` decides the winner.
    pub async fn request_booking(
        &self,
        claims: &Claims,
        unit_id: Uuid,
        terms: &BookingTerms,
    ) -> Result<BookingReceipt, BookingError> {
        if claims.role != Role::Student {
            return Err(BookingError::NotPermitted);
        }
        if terms.duration_months <= 0 {
            return Err(BookingError::InvalidTerms(
                "duration must be at least one month".to_string(),
            ));
        }

        let unit = self
            .units
            .get_unit(unit_id)
            .await?
            .ok_or(BookingError::NotFound)?;

        if !unit.gender_policy.admits(claims.gender) {
            return Err(BookingError::PolicyViolation {
                policy: unit.gender_policy,
            });
        }

        // Double-click / double-tab guard: an existing active booking by
        // the same tenant on the same unit is returned as-is, without a
        // second hold.
        if let Some(existing) = self
            .bookings
            .find_active_for_tenant(&claims.sub, unit_id)
            .await?
        {
            info!(booking_id = %existing.id, tenant = %claims.sub, "duplicate request, returning existing booking");
            let payment_reference = existing.payment_reference.clone();
            return Ok(BookingReceipt {
                booking: existing,
                payment_reference,
            });
        }

        let total_amount = unit.price_per_bed * i64::from(terms.duration_months);

        let (token, deadline) = self.holds.place_hold(&unit, self.rules.hold_ttl).await?;

        let mut booking =
            Booking::new_hold(claims.sub.clone(), unit_id, total_amount, terms, deadline);

        match self
            .payments
            .create_intent(booking.id, total_amount, &self.rules.currency)
            .await
        {
            Ok(intent) => booking.payment_reference = Some(intent.reference),
            Err(e) => {
                self.holds.abort_hold(token);
                return Err(BookingError::Provider(e.to_string()));
            }
        }

        // Slot and row must move together: if the row cannot be written,
        // give the slot back instead of leaving a phantom occupant.
        if let Err(e) = self.create_with_retry(&booking).await {
            self.holds.abort_hold(token);
            // Two requests from the same tenant can pass the pre-check in
            // the same instant; the store's one-active-per-tenant-and-unit
            // constraint picks the winner and the loser hands back the
            // winner's booking.
            if matches!(e, StoreError::Conflict) {
                if let Some(existing) = self
                    .bookings
                    .find_active_for_tenant(&claims.sub, unit_id)
                    .await?
                {
                    info!(booking_id = %existing.id, tenant = %claims.sub, "simultaneous duplicate request, returning existing booking");
                    let payment_reference = existing.payment_reference.clone();
                    return Ok(BookingReceipt {
                        booking: existing,
                        payment_reference,
                    });
                }
            }
            return Err(e.into());
        }

        self.feed.publish_booking(&booking);
        info!(
            booking_id = %booking.id,
            %unit_id,
            tenant = %claims.sub,
            expires_at = %deadline,
            "booking placed on hold"
        );

        let payment_reference = booking.payment_reference.clone();
        Ok(BookingReceipt {
            booking,
            payment_reference,
        })
    }

    /// Cancel an active booking. Permitted to the owning tenant or an
    /// admin; cancelling an already-cancelled booking is a no-op and does
    /// not touch occupancy again.
    pub async fn cancel_booking(
        &self,
        booking_id: Uuid,
        claims: &Claims,
    ) -> Result<Booking, BookingError> {
        let booking = self
            .bookings
            .get_booking(booking_id)
            .await?
            .ok_or(BookingError::NotFound)?;

        if claims.role != Role::Admin && claims.sub != booking.tenant_id {
            return Err(BookingError::NotPermitted);
        }

        match self
            .bookings
            .transition_booking(
                booking_id,
                &[BookingStatus::OnHold, BookingStatus::Confirmed],
                BookingStatus::Cancelled,
                None,
            )
            .await?
        {
            Transition::Applied(cancelled) => {
                self.holds.cancel_hold(&cancelled, true);
                self.feed.publish_booking(&cancelled);
                info!(%booking_id, "booking cancelled");
                Ok(cancelled)
            }
            Transition::NotApplied(current) if current.status == BookingStatus::Cancelled => {
                info!(%booking_id, "booking already cancelled");
                Ok(current)
            }
            Transition::NotApplied(current) => Err(BookingError::InvalidTransition {
                from: current.status,
                to: BookingStatus::Cancelled,
            }),
        }
    }

    pub async fn get_booking(
        &self,
        booking_id: Uuid,
        claims: &Claims,
    ) -> Result<Booking, BookingError> {
        let booking = self
            .bookings
            .get_booking(booking_id)
            .await?
            .ok_or(BookingError::NotFound)?;

        let permitted = match claims.role {
            Role::Admin | Role::Landlord => true,
            Role::Student => claims.sub == booking.tenant_id,
        };
        if !permitted {
            return Err(BookingError::NotPermitted);
        }
        Ok(booking)
    }

    async fn create_with_retry(&self, booking: &Booking) -> Result<(), StoreError> {
        let mut attempt = 1;
        loop {
            match self.bookings.create_booking(booking).await {
                Ok(()) => return Ok(()),
                Err(StoreError::Unavailable(reason)) if attempt < STORE_RETRY_ATTEMPTS => {
                    warn!(booking_id = %booking.id, attempt, %reason, "store write failed, retrying");
                    sleep(TokioDuration::from_millis(50 * u64::from(attempt))).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
